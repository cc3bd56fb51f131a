//! Flat instruction code for template and procedure bodies.
//!
//! Bodies are lowered from the [`Instruction`] tree into a linear [`Program`] so
//! an activation can stop at any `process-*` directive and resume later from a
//! plain program counter. Lowering is also where the static checks live:
//! undeclared variables, unknown procedures and groups, unknown functions and
//! suspending directives in places that cannot be resumed.

use crate::ast::{
    Avt, ComputedName, GlobalParam, Group, GroupId, Instruction, ProcedureId, ProcessCall,
    ValueSource, WithParam,
};
use crate::error::{Location, StxError};
use crate::pattern::Pattern;
use strix_stxpath::Expr;
use strix_stxpath::functions::is_builtin;
use strix_types::QName;

/// Functions the engine adds to the STXPath library.
pub const EXTENSION_FUNCTIONS: &[&str] = &["buffer", "filter-available"];

#[derive(Debug, Clone)]
pub(crate) enum BindSource {
    Select(Expr),
    /// Pops the innermost text capture.
    Captured,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindKind {
    Variable,
    Param { required: bool },
    Assign,
}

#[derive(Debug, Clone)]
pub(crate) enum Op {
    Text(String),
    ValueOf {
        select: Expr,
        separator: Option<Avt>,
    },
    StartLiteral {
        name: QName,
        attributes: Vec<(QName, Avt)>,
    },
    StartComputed(ComputedName),
    /// Closes an element. `None` closes whatever element is innermost.
    EndElement(Option<ComputedName>),
    Attribute {
        name: ComputedName,
        source: BindSource,
    },
    BeginCapture,
    Comment(BindSource),
    ProcessingInstruction {
        target: Avt,
        source: BindSource,
    },
    CopyStart {
        attributes: Option<Pattern>,
    },
    CopyEnd,
    PushScope,
    PopScope,
    Bind {
        kind: BindKind,
        name: String,
        source: BindSource,
    },
    DeclareBuffer(String),
    BeginRedirect {
        name: String,
        clear: bool,
    },
    EndRedirect,
    Jump(usize),
    JumpUnless {
        test: Expr,
        target: usize,
    },
    ForEachInit(Expr),
    /// Binds the next item in a fresh scope, or leaves the loop for `exit`.
    ForEachNext {
        name: String,
        exit: usize,
    },
    Call {
        procedure: ProcedureId,
        params: Vec<WithParam>,
    },
    Process {
        call: ProcessCall,
        group: Option<GroupId>,
    },
    Message(BindSource),
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub(crate) ops: Vec<Op>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// What lowering needs to know about the rest of the sheet.
pub(crate) struct LoweringEnv<'a> {
    pub groups: &'a [Group],
    /// Name, owning group and visibility of every procedure, by id.
    pub procedures: &'a [(QName, GroupId, bool)],
    pub params: &'a [GlobalParam],
}

impl LoweringEnv<'_> {
    fn chain(&self, group: GroupId) -> impl Iterator<Item = GroupId> + '_ {
        std::iter::successors(Some(group), move |g| self.groups[*g].parent)
    }

    fn group_variable_declared(&self, group: GroupId, name: &str) -> bool {
        self.chain(group)
            .any(|g| self.groups[g].variables.iter().any(|v| v.name == name))
            || self.params.iter().any(|p| p.name == name)
    }

    /// A group sees its own procedures and the public ones of its child groups,
    /// then the same again for each enclosing group.
    fn resolve_procedure(&self, group: GroupId, name: &QName) -> Option<ProcedureId> {
        for g in self.chain(group) {
            let own = self
                .procedures
                .iter()
                .position(|(n, owner, _)| n == name && *owner == g);
            if own.is_some() {
                return own;
            }
            let from_child = self.procedures.iter().position(|(n, owner, public)| {
                n == name && *public && self.groups[*owner].parent == Some(g)
            });
            if from_child.is_some() {
                return from_child;
            }
        }
        None
    }

    fn resolve_group(&self, name: &str) -> Option<GroupId> {
        self.groups
            .iter()
            .position(|g| g.name.as_deref() == Some(name))
    }
}

pub(crate) struct Lowering<'a> {
    env: &'a LoweringEnv<'a>,
    group: GroupId,
    location: Location,
    ops: Vec<Op>,
    scopes: Vec<Vec<String>>,
    loop_depth: usize,
    capture_depth: usize,
}

impl<'a> Lowering<'a> {
    pub fn lower(
        env: &'a LoweringEnv<'a>,
        group: GroupId,
        location: Location,
        body: &[Instruction],
    ) -> Result<Program, StxError> {
        let mut lowering = Lowering {
            env,
            group,
            location,
            ops: Vec::new(),
            scopes: vec![Vec::new()],
            loop_depth: 0,
            capture_depth: 0,
        };
        lowering.block(body)?;
        Ok(Program { ops: lowering.ops })
    }

    fn error(&self, message: impl Into<String>) -> StxError {
        StxError::compile(message, self.location)
    }

    fn emit(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    fn patch(&mut self, at: usize, target: usize) {
        match &mut self.ops[at] {
            Op::Jump(t) | Op::JumpUnless { target: t, .. } | Op::ForEachNext { exit: t, .. } => {
                *t = target
            }
            _ => {}
        }
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.to_string());
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.iter().any(|n| n == name))
            || self.env.group_variable_declared(self.group, name)
    }

    fn check(&self, expr: &Expr) -> Result<(), StxError> {
        if let Some(name) = expr.variables().iter().find(|v| !self.is_declared(v)) {
            return Err(self.error(format!(
                "variable '${}' in '{}' is not declared",
                name,
                expr.text()
            )));
        }
        if let Some(name) = expr
            .functions()
            .iter()
            .find(|f| !is_builtin(f) && !EXTENSION_FUNCTIONS.contains(&f.as_str()))
        {
            return Err(self.error(format!("unknown function '{}()' in '{}'", name, expr.text())));
        }
        Ok(())
    }

    fn check_avt(&self, avt: &Avt) -> Result<(), StxError> {
        avt.expressions().try_for_each(|e| self.check(e))
    }

    fn check_name(&self, name: &ComputedName) -> Result<(), StxError> {
        self.check_avt(&name.name)?;
        if let Some(ns) = &name.namespace {
            self.check_avt(ns)?;
        }
        Ok(())
    }

    /// A block with its own variable scope.
    fn scoped(&mut self, body: &[Instruction]) -> Result<(), StxError> {
        self.emit(Op::PushScope);
        self.scopes.push(Vec::new());
        self.block(body)?;
        self.scopes.pop();
        self.emit(Op::PopScope);
        Ok(())
    }

    fn block(&mut self, body: &[Instruction]) -> Result<(), StxError> {
        body.iter().try_for_each(|i| self.instruction(i))
    }

    /// Lowers a value source; content is captured as text.
    fn source(&mut self, value: &ValueSource) -> Result<BindSource, StxError> {
        Ok(match value {
            ValueSource::Select(expr) => {
                self.check(expr)?;
                BindSource::Select(expr.clone())
            }
            ValueSource::Content(body) => {
                self.emit(Op::BeginCapture);
                self.capture_depth += 1;
                self.scoped(body)?;
                self.capture_depth -= 1;
                BindSource::Captured
            }
            ValueSource::Empty => BindSource::Empty,
        })
    }

    fn params(&self, params: &[WithParam]) -> Result<(), StxError> {
        params.iter().try_for_each(|p| self.check(&p.select))
    }

    fn instruction(&mut self, instruction: &Instruction) -> Result<(), StxError> {
        match instruction {
            Instruction::LiteralElement {
                name,
                attributes,
                body,
            } => {
                for (_, avt) in attributes {
                    self.check_avt(avt)?;
                }
                self.emit(Op::StartLiteral {
                    name: name.clone(),
                    attributes: attributes.clone(),
                });
                self.scoped(body)?;
                self.emit(Op::EndElement(None));
            }
            Instruction::Element { name, body } => {
                self.check_name(name)?;
                self.emit(Op::StartComputed(name.clone()));
                self.scoped(body)?;
                self.emit(Op::EndElement(None));
            }
            Instruction::StartElement(name) => {
                self.check_name(name)?;
                self.emit(Op::StartComputed(name.clone()));
            }
            Instruction::EndElement(name) => {
                self.check_name(name)?;
                self.emit(Op::EndElement(Some(name.clone())));
            }
            Instruction::Attribute { name, value } => {
                self.check_name(name)?;
                let source = self.source(value)?;
                self.emit(Op::Attribute {
                    name: name.clone(),
                    source,
                });
            }
            Instruction::Text(text) => {
                self.emit(Op::Text(text.clone()));
            }
            Instruction::ValueOf { select, separator } => {
                self.check(select)?;
                if let Some(separator) = separator {
                    self.check_avt(separator)?;
                }
                self.emit(Op::ValueOf {
                    select: select.clone(),
                    separator: separator.clone(),
                });
            }
            Instruction::Copy { attributes, body } => {
                self.emit(Op::CopyStart {
                    attributes: attributes.clone(),
                });
                self.scoped(body)?;
                self.emit(Op::CopyEnd);
            }
            Instruction::Comment(value) => {
                let source = self.source(value)?;
                self.emit(Op::Comment(source));
            }
            Instruction::ProcessingInstruction { target, value } => {
                self.check_avt(target)?;
                let source = self.source(value)?;
                self.emit(Op::ProcessingInstruction {
                    target: target.clone(),
                    source,
                });
            }
            Instruction::If {
                test,
                then,
                otherwise,
            } => {
                self.check(test)?;
                let branch = self.emit(Op::JumpUnless {
                    test: test.clone(),
                    target: 0,
                });
                self.scoped(then)?;
                if otherwise.is_empty() {
                    let end = self.ops.len();
                    self.patch(branch, end);
                } else {
                    let skip = self.emit(Op::Jump(0));
                    let else_start = self.ops.len();
                    self.patch(branch, else_start);
                    self.scoped(otherwise)?;
                    let end = self.ops.len();
                    self.patch(skip, end);
                }
            }
            Instruction::Choose {
                branches,
                otherwise,
            } => {
                let mut exits = Vec::new();
                for (test, body) in branches {
                    self.check(test)?;
                    let branch = self.emit(Op::JumpUnless {
                        test: test.clone(),
                        target: 0,
                    });
                    self.scoped(body)?;
                    exits.push(self.emit(Op::Jump(0)));
                    let next = self.ops.len();
                    self.patch(branch, next);
                }
                if !otherwise.is_empty() {
                    self.scoped(otherwise)?;
                }
                let end = self.ops.len();
                for exit in exits {
                    self.patch(exit, end);
                }
            }
            Instruction::ForEachItem { name, select, body } => {
                self.check(select)?;
                self.emit(Op::ForEachInit(select.clone()));
                let head = self.emit(Op::ForEachNext {
                    name: name.clone(),
                    exit: 0,
                });
                self.loop_depth += 1;
                self.scopes.push(vec![name.clone()]);
                self.block(body)?;
                self.scopes.pop();
                self.loop_depth -= 1;
                self.emit(Op::PopScope);
                self.emit(Op::Jump(head));
                let end = self.ops.len();
                self.patch(head, end);
            }
            Instruction::While { test, body } => {
                self.check(test)?;
                let head = self.emit(Op::JumpUnless {
                    test: test.clone(),
                    target: 0,
                });
                self.loop_depth += 1;
                self.scoped(body)?;
                self.loop_depth -= 1;
                self.emit(Op::Jump(head));
                let end = self.ops.len();
                self.patch(head, end);
            }
            Instruction::Variable { name, value, .. } => {
                let source = self.source(value)?;
                self.emit(Op::Bind {
                    kind: BindKind::Variable,
                    name: name.clone(),
                    source,
                });
                self.declare(name);
            }
            Instruction::Param {
                name,
                value,
                required,
                ..
            } => {
                let source = self.source(value)?;
                self.emit(Op::Bind {
                    kind: BindKind::Param {
                        required: *required,
                    },
                    name: name.clone(),
                    source,
                });
                self.declare(name);
            }
            Instruction::Assign {
                name,
                value,
                location,
            } => {
                if !self.is_declared(name) {
                    return Err(StxError::compile(
                        format!("cannot assign undeclared variable '{}'", name),
                        *location,
                    ));
                }
                let source = self.source(value)?;
                self.emit(Op::Bind {
                    kind: BindKind::Assign,
                    name: name.clone(),
                    source,
                });
            }
            Instruction::CallProcedure {
                name,
                params,
                location,
            } => {
                self.params(params)?;
                let procedure = self.env.resolve_procedure(self.group, name).ok_or_else(|| {
                    StxError::compile(
                        format!("procedure '{}' is not visible here", name),
                        *location,
                    )
                })?;
                self.emit(Op::Call {
                    procedure,
                    params: params.clone(),
                });
            }
            Instruction::Process(call) => self.process(call)?,
            Instruction::Buffer { name, body } => {
                self.emit(Op::DeclareBuffer(name.clone()));
                if !body.is_empty() {
                    self.emit(Op::BeginRedirect {
                        name: name.clone(),
                        clear: false,
                    });
                    self.scoped(body)?;
                    self.emit(Op::EndRedirect);
                }
            }
            Instruction::ResultBuffer {
                name, clear, body, ..
            } => {
                self.emit(Op::BeginRedirect {
                    name: name.clone(),
                    clear: *clear,
                });
                self.scoped(body)?;
                self.emit(Op::EndRedirect);
            }
            Instruction::Message(value) => {
                let source = self.source(value)?;
                self.emit(Op::Message(source));
            }
        }
        Ok(())
    }

    fn process(&mut self, call: &ProcessCall) -> Result<(), StxError> {
        let element = call.kind.element_name();
        if call.kind.suspends() {
            if self.loop_depth > 0 {
                return Err(StxError::compile(
                    format!("stx:{} is not allowed inside a loop", element),
                    call.location,
                ));
            }
            if self.capture_depth > 0 {
                return Err(StxError::compile(
                    format!("stx:{} is not allowed in text content", element),
                    call.location,
                ));
            }
        }
        self.params(&call.params)?;
        if let Some(filter) = &call.filter {
            self.check_avt(&filter.method)?;
            if let Some(src) = &filter.src {
                self.check_avt(src)?;
            }
        }
        if let crate::ast::ProcessKind::Doc { href, base } = &call.kind {
            self.check_avt(href)?;
            if let Some(base) = base {
                self.check_avt(base)?;
            }
        }
        let group = match &call.group {
            Some(name) => Some(self.env.resolve_group(name).ok_or_else(|| {
                StxError::compile(format!("no group named '{}'", name), call.location)
            })?),
            None => None,
        };
        self.emit(Op::Process {
            call: call.clone(),
            group,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{PassThrough, ProcessKind};
    use strix_stxpath::Namespaces;

    fn expr(text: &str) -> Expr {
        Expr::parse(text, &Namespaces::new()).unwrap()
    }

    fn env_groups() -> Vec<Group> {
        vec![Group::new(None, None, PassThrough::None, Location::default())]
    }

    fn lower(body: &[Instruction]) -> Result<Program, StxError> {
        let groups = env_groups();
        let env = LoweringEnv {
            groups: &groups,
            procedures: &[],
            params: &[],
        };
        Lowering::lower(&env, 0, Location::default(), body)
    }

    fn process(kind: ProcessKind) -> Instruction {
        Instruction::Process(ProcessCall {
            kind,
            params: vec![],
            filter: None,
            group: None,
            location: Location::default(),
        })
    }

    #[test]
    fn test_if_else_jumps() {
        let program = lower(&[Instruction::If {
            test: expr("1"),
            then: vec![Instruction::Text("a".into())],
            otherwise: vec![Instruction::Text("b".into())],
        }])
        .unwrap();
        // JumpUnless, Push, Text, Pop, Jump, Push, Text, Pop
        assert_eq!(program.len(), 8);
        assert!(matches!(program.ops[0], Op::JumpUnless { target: 5, .. }));
        assert!(matches!(program.ops[4], Op::Jump(8)));
    }

    #[test]
    fn test_variables_must_be_declared_before_use() {
        let err = lower(&[Instruction::ValueOf {
            select: expr("$x"),
            separator: None,
        }])
        .unwrap_err();
        assert!(err.to_string().contains("$x"));

        let ok = lower(&[
            Instruction::Variable {
                name: "x".into(),
                value: ValueSource::Select(expr("1")),
                location: Location::default(),
            },
            Instruction::ValueOf {
                select: expr("$x"),
                separator: None,
            },
        ]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_loop_variable_is_scoped_to_the_loop() {
        let body = [
            Instruction::ForEachItem {
                name: "i".into(),
                select: expr("1"),
                body: vec![Instruction::ValueOf {
                    select: expr("$i"),
                    separator: None,
                }],
            },
            Instruction::ValueOf {
                select: expr("$i"),
                separator: None,
            },
        ];
        assert!(lower(&body).is_err());
        assert!(lower(&body[..1]).is_ok());
    }

    #[test]
    fn test_suspending_directive_rejected_in_loop() {
        let err = lower(&[Instruction::While {
            test: expr("false()"),
            body: vec![process(ProcessKind::Children)],
        }])
        .unwrap_err();
        assert!(err.to_string().contains("process-children"));

        assert!(
            lower(&[Instruction::While {
                test: expr("false()"),
                body: vec![process(ProcessKind::Attributes)],
            }])
            .is_ok()
        );
    }

    #[test]
    fn test_unknown_function_and_procedure() {
        assert!(
            lower(&[Instruction::ValueOf {
                select: expr("frobnicate()"),
                separator: None,
            }])
            .is_err()
        );
        assert!(
            lower(&[Instruction::ValueOf {
                select: expr("filter-available('urn:x')"),
                separator: None,
            }])
            .is_ok()
        );
        assert!(
            lower(&[Instruction::CallProcedure {
                name: QName::new("nope"),
                params: vec![],
                location: Location::default(),
            }])
            .is_err()
        );
    }
}
