//! The interpreter for template and procedure bodies.
//!
//! A body runs as an [`Activation`]: a program counter over its [`Program`] plus
//! its local scopes and loop state. Procedure calls push further activations.
//! When a `process-children`, `process-self` or `process-siblings` directive is
//! reached the whole activation stack is packed into a [`Continuation`] and
//! handed back to the traversal, which resumes it once the stream gets there.

use crate::ast::{AvtPart, ComputedName, GroupId, ProcedureId, Sheet, TemplateId, WithParam};
use crate::buffer::BufferHandle;
use crate::config::{Capabilities, ProcessorConfig};
use crate::context::ContextStack;
use crate::error::StxError;
use crate::executor_handlers::{control_flow, output, process, variables};
use crate::filter;
use crate::output::Emitter;
use crate::pattern::Pattern;
use crate::program::{BindSource, Op, Program};
use crate::util::element_name;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use strix_stxpath::compile::resolve_qname;
use strix_stxpath::{Context, Expr, ExprError, Node, Value, ValueStack, evaluate};
use strix_traits::{FilterHandler, LogMessageSink, MessageSink};
use strix_types::{NodeKind, QName};

pub(crate) type Params = HashMap<String, Value>;

#[derive(Debug, Default)]
pub(crate) struct Scope {
    pub vars: HashMap<String, Value>,
    pub buffers: HashMap<String, BufferHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Code {
    Template(TemplateId),
    Procedure(ProcedureId),
}

#[derive(Debug)]
pub(crate) struct LoopState {
    pub items: Vec<Value>,
    pub next: usize,
}

#[derive(Debug)]
pub(crate) struct Activation {
    pub code: Code,
    pub pc: usize,
    pub scopes: Vec<Scope>,
    pub loops: Vec<LoopState>,
    pub params: Rc<Params>,
    pub group: GroupId,
    /// One entry per open `stx:copy`: whether it started an element.
    pub copies: Vec<bool>,
}

impl Activation {
    pub fn new(code: Code, group: GroupId, params: Rc<Params>) -> Self {
        Activation {
            code,
            pc: 0,
            scopes: vec![Scope::default()],
            loops: Vec::new(),
            params,
            group,
            copies: Vec::new(),
        }
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        if self.scopes.is_empty() {
            self.scopes.push(Scope::default());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}

/// A suspended template: everything needed to carry on where it stopped.
pub(crate) struct Continuation {
    pub activations: Vec<Activation>,
    /// The node the template was matched for.
    pub focus: Rc<Node>,
    /// Group whose candidate list produced the match, and the rank within it.
    pub selected_in: GroupId,
    pub rank: usize,
}

/// What a suspended template asked the traversal for.
pub(crate) enum Directive {
    Children {
        params: Params,
        filter: Option<Box<dyn FilterHandler>>,
        group: GroupId,
    },
    SelfNode {
        params: Params,
        group: Option<GroupId>,
    },
    Siblings {
        params: Params,
        while_: Option<Pattern>,
        until: Option<Pattern>,
        group: GroupId,
    },
}

pub(crate) enum Outcome {
    Completed,
    Suspended(Directive, Continuation),
}

/// Result of executing one op.
pub(crate) enum Flow {
    Next,
    Call(Activation),
    Suspend(Directive),
}

/// What an expression sees: the open ancestors and the node in focus.
#[derive(Clone, Copy)]
pub(crate) struct Focus<'a> {
    pub chain: &'a [Rc<Node>],
    pub node: &'a Rc<Node>,
}

impl<'a> Focus<'a> {
    pub fn new(stack: &'a ContextStack, node: &'a Rc<Node>) -> Self {
        Focus {
            chain: stack.chain(),
            node,
        }
    }
}

pub(crate) struct EvalContext<'a> {
    sheet: &'a Sheet,
    globals: &'a [HashMap<String, Value>],
    locals: &'a [Scope],
    group: GroupId,
    focus: Focus<'a>,
    strict: bool,
    caps: &'a Capabilities,
}

impl Context for EvalContext<'_> {
    fn node(&self) -> &Rc<Node> {
        self.focus.node
    }

    fn node_at(&self, depth: usize) -> Option<Rc<Node>> {
        let node = self.focus.node;
        if depth == node.depth && node.kind != NodeKind::Attribute {
            Some(node.clone())
        } else {
            self.focus.chain.get(depth).cloned()
        }
    }

    fn variable(&self, name: &str) -> Option<Value> {
        self.locals
            .iter()
            .rev()
            .find_map(|s| s.vars.get(name))
            .or_else(|| {
                self.sheet
                    .group_chain(self.group)
                    .find_map(|g| self.globals.get(g).and_then(|vars| vars.get(name)))
            })
            .cloned()
    }

    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, ExprError>> {
        match (name, args) {
            ("filter-available", [uri]) => Some(Ok(Value::Boolean(filter::available(
                self.caps,
                &uri.to_string(),
            )))),
            ("buffer", [buffer]) => Some(Ok(Value::Buffer(buffer.to_string()))),
            ("filter-available" | "buffer", _) => Some(Err(ExprError::function(
                name,
                format!("expected 1 argument, got {}", args.len()),
            ))),
            _ => None,
        }
    }

    fn buffer_size(&self, name: &str) -> Option<usize> {
        let handle = self
            .locals
            .iter()
            .rev()
            .find_map(|s| s.buffers.get(name).cloned())
            .or_else(|| {
                self.sheet
                    .buffer(self.group, name)
                    .map(|b| BufferHandle::Persistent(b.clone()))
            })?;
        handle.size(name).ok()
    }

    fn strict(&self) -> bool {
        self.strict
    }
}

/// Per-transformation state shared by every activation.
pub(crate) struct Runtime<'h> {
    pub sheet: Arc<Sheet>,
    pub config: Arc<ProcessorConfig>,
    pub caps: Capabilities,
    pub emitter: Emitter<'h>,
    /// Group variables, indexed by group.
    pub globals: Vec<HashMap<String, Value>>,
    pub values: ValueStack,
    pub replay_depth: usize,
}

impl<'h> Runtime<'h> {
    pub fn new(
        sheet: Arc<Sheet>,
        config: Arc<ProcessorConfig>,
        caps: Capabilities,
        emitter: Emitter<'h>,
    ) -> Self {
        Runtime {
            sheet,
            config,
            caps,
            emitter,
            globals: Vec::new(),
            values: ValueStack::new(),
            replay_depth: 0,
        }
    }

    /// Binds top-level parameters and evaluates group variables for a new document.
    pub fn initialize(&mut self, document: &Rc<Node>) -> Result<(), StxError> {
        let sheet = self.sheet.clone();
        self.globals = vec![HashMap::new(); sheet.groups.len()];
        let chain = [document.clone()];
        let focus = Focus {
            chain: &chain,
            node: document,
        };

        for param in &sheet.params {
            let value = match self.config.params.get(&param.name) {
                Some(value) => Value::String(value.clone()),
                None if param.required => {
                    return Err(StxError::execution(
                        "/",
                        format!("required parameter '{}' was not supplied", param.name),
                    ));
                }
                None => match &param.select {
                    Some(select) => self.evaluate(select, focus, &[], Sheet::ROOT_GROUP)?,
                    None => Value::String(param.text.clone()),
                },
            };
            self.globals[Sheet::ROOT_GROUP].insert(param.name.clone(), value);
        }

        // parents precede their children in the group table
        for (id, group) in sheet.groups.iter().enumerate() {
            for variable in &group.variables {
                let value = match &variable.select {
                    Some(select) => self.evaluate(select, focus, &[], id)?,
                    None => Value::String(variable.text.clone()),
                };
                self.globals[id].insert(variable.name.clone(), value);
            }
        }
        Ok(())
    }

    pub fn evaluate(
        &mut self,
        expr: &Expr,
        focus: Focus<'_>,
        locals: &[Scope],
        group: GroupId,
    ) -> Result<Value, StxError> {
        let ctx = EvalContext {
            sheet: &self.sheet,
            globals: &self.globals,
            locals,
            group,
            focus,
            strict: self.config.strict,
            caps: &self.caps,
        };
        evaluate(expr, &ctx, &mut self.values).map_err(|e| StxError::expr(expr.text(), e))
    }

    pub fn eval(
        &mut self,
        stack: &ContextStack,
        focus: &Rc<Node>,
        act: &Activation,
        expr: &Expr,
    ) -> Result<Value, StxError> {
        self.evaluate(expr, Focus::new(stack, focus), &act.scopes, act.group)
    }

    pub fn eval_string(
        &mut self,
        stack: &ContextStack,
        focus: &Rc<Node>,
        act: &Activation,
        expr: &Expr,
    ) -> Result<String, StxError> {
        Ok(self.eval(stack, focus, act, expr)?.to_string())
    }

    pub fn eval_avt(
        &mut self,
        stack: &ContextStack,
        focus: &Rc<Node>,
        act: &Activation,
        avt: &crate::ast::Avt,
    ) -> Result<String, StxError> {
        let mut out = String::new();
        for part in avt.parts() {
            match part {
                AvtPart::Static(s) => out.push_str(s),
                AvtPart::Dynamic(expr) => out.push_str(&self.eval_string(stack, focus, act, expr)?),
            }
        }
        Ok(out)
    }

    /// Produces the value of a variable, parameter or assignment. Captured
    /// content is always popped, even when the caller ends up not using it.
    pub fn bind_value(
        &mut self,
        stack: &ContextStack,
        focus: &Rc<Node>,
        act: &Activation,
        source: &BindSource,
    ) -> Result<Value, StxError> {
        match source {
            BindSource::Select(expr) => self.eval(stack, focus, act, expr),
            BindSource::Captured => Ok(Value::String(self.emitter.end_capture()?)),
            BindSource::Empty => Ok(Value::String(String::new())),
        }
    }

    pub fn params(
        &mut self,
        stack: &ContextStack,
        focus: &Rc<Node>,
        act: &Activation,
        params: &[WithParam],
    ) -> Result<Params, StxError> {
        let mut values = Params::new();
        for param in params {
            let value = self.eval(stack, focus, act, &param.select)?;
            values.insert(param.name.clone(), value);
        }
        Ok(values)
    }

    /// Resolves a run-time element or attribute name. Unprefixed element names
    /// take the default namespace in scope; unprefixed attribute names do not.
    pub fn computed_name(
        &mut self,
        stack: &ContextStack,
        focus: &Rc<Node>,
        act: &Activation,
        name: &ComputedName,
        attribute: bool,
    ) -> Result<QName, StxError> {
        let lexical = self.eval_avt(stack, focus, act, &name.name)?;
        let lexical = lexical.trim();
        if lexical.is_empty() {
            return Err(StxError::execution(stack.path(), "computed name is empty"));
        }
        if let Some(namespace) = &name.namespace {
            let uri = self.eval_avt(stack, focus, act, namespace)?;
            let (prefix, local) = match lexical.split_once(':') {
                Some((p, l)) => (Some(p.to_string()), l),
                None => (None, lexical),
            };
            return Ok(QName::with_namespace(prefix, local, Some(uri)));
        }
        let resolved = if attribute {
            resolve_qname(lexical, &name.namespaces)
        } else {
            element_name(lexical, &name.namespaces)
        };
        resolved.map_err(|e| StxError::execution(stack.path(), e.to_string()))
    }

    /// Finds a buffer by name: template scopes first, then group buffers.
    pub fn lookup_buffer(
        &self,
        stack: &ContextStack,
        act: &Activation,
        name: &str,
    ) -> Result<BufferHandle, StxError> {
        act.scopes
            .iter()
            .rev()
            .find_map(|s| s.buffers.get(name).cloned())
            .or_else(|| {
                self.sheet
                    .buffer(act.group, name)
                    .map(|b| BufferHandle::Persistent(b.clone()))
            })
            .ok_or_else(|| StxError::UnknownBuffer {
                name: name.to_string(),
                path: stack.path(),
            })
    }

    pub fn message(&self, text: &str) {
        match &self.caps.messages {
            Some(sink) => sink.message(text),
            None => LogMessageSink.message(text),
        }
    }
}

fn step(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    focus: &Rc<Node>,
    act: &mut Activation,
    op: &Op,
) -> Result<Flow, StxError> {
    match op {
        Op::Text(_)
        | Op::ValueOf { .. }
        | Op::StartLiteral { .. }
        | Op::StartComputed(_)
        | Op::EndElement(_)
        | Op::Attribute { .. }
        | Op::BeginCapture
        | Op::Comment(_)
        | Op::ProcessingInstruction { .. }
        | Op::CopyStart { .. }
        | Op::CopyEnd
        | Op::Message(_) => output::handle_output(rt, stack, focus, act, op),
        Op::PushScope
        | Op::PopScope
        | Op::Bind { .. }
        | Op::DeclareBuffer(_)
        | Op::BeginRedirect { .. }
        | Op::EndRedirect => variables::handle_variables(rt, stack, focus, act, op),
        Op::Jump(_)
        | Op::JumpUnless { .. }
        | Op::ForEachInit(_)
        | Op::ForEachNext { .. }
        | Op::Call { .. } => control_flow::handle_control_flow(rt, stack, focus, act, op),
        Op::Process { call, group } => process::handle_process(rt, stack, focus, act, call, *group),
    }
}

fn program(sheet: &Sheet, code: Code) -> &Program {
    match code {
        Code::Template(id) => &sheet.templates[id].program,
        Code::Procedure(id) => &sheet.procedures[id].program,
    }
}

/// Runs a continuation until it completes or suspends again.
pub(crate) fn run(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    mut cont: Continuation,
) -> Result<Outcome, StxError> {
    let sheet = rt.sheet.clone();
    loop {
        let Continuation {
            activations, focus, ..
        } = &mut cont;
        let Some(act) = activations.last_mut() else {
            return Ok(Outcome::Completed);
        };
        let code = program(&sheet, act.code);
        let Some(op) = code.ops.get(act.pc) else {
            activations.pop();
            continue;
        };
        act.pc += 1;

        match step(rt, stack, focus, act, op)? {
            Flow::Next => {}
            Flow::Call(activation) => activations.push(activation),
            Flow::Suspend(directive) => return Ok(Outcome::Suspended(directive, cont)),
        }
    }
}
