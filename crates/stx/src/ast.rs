//! The compiled sheet model.
//!
//! The compiler turns STX source into these types; the runtime only ever reads
//! them, so one [`Sheet`] is shared by every transformation that uses it. The one
//! mutable part, persistent group buffers, sits behind a mutex.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Sheet`] | Groups, templates, procedures and the precomputed match candidates |
//! | [`Group`] | A scope for templates, procedures, variables and buffers |
//! | [`Template`] | One match pattern (union patterns are split) with its priority and body |
//! | [`Procedure`] | A named body invoked by `stx:call-procedure` |
//! | [`Instruction`] | The instruction tree of a body, as written |

use crate::buffer::SharedBuffer;
use crate::error::Location;
use crate::pattern::Pattern;
use crate::program::Program;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strix_stxpath::{Expr, ExprError, Namespaces};
use strix_types::QName;

pub const STX_NAMESPACE: &str = "http://stx.sourceforge.net/2002/ns";

pub type GroupId = usize;
pub type TemplateId = usize;
pub type ProcedureId = usize;

/// What happens to a node no template matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassThrough {
    /// Drop the node and its subtree.
    #[default]
    None,
    /// Descend into elements and copy text.
    Text,
    /// Copy the node and descend.
    All,
}

impl PassThrough {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "none" => Some(PassThrough::None),
            "text" => Some(PassThrough::Text),
            "all" => Some(PassThrough::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AvtPart {
    Static(String),
    Dynamic(Expr),
}

/// An attribute value template such as `item-{$n}`.
#[derive(Debug, Clone)]
pub struct Avt {
    parts: Vec<AvtPart>,
}

impl Avt {
    pub fn literal(text: impl Into<String>) -> Self {
        Avt {
            parts: vec![AvtPart::Static(text.into())],
        }
    }

    pub fn parse(text: &str, namespaces: &Namespaces) -> Result<Self, ExprError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '{' if chars.peek().is_some_and(|(_, n)| *n == '{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().is_some_and(|(_, n)| *n == '}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let end = expression_end(text, i + 1).ok_or_else(|| {
                        ExprError::Parse(
                            text.to_string(),
                            "unterminated '{' in attribute value".into(),
                        )
                    })?;
                    if !literal.is_empty() {
                        parts.push(AvtPart::Static(std::mem::take(&mut literal)));
                    }
                    parts.push(AvtPart::Dynamic(Expr::parse(&text[i + 1..end], namespaces)?));
                    while chars.peek().is_some_and(|(j, _)| *j <= end) {
                        chars.next();
                    }
                }
                '}' => {
                    return Err(ExprError::Parse(
                        text.to_string(),
                        "unescaped '}' in attribute value".into(),
                    ));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() || parts.is_empty() {
            parts.push(AvtPart::Static(literal));
        }
        Ok(Avt { parts })
    }

    pub fn parts(&self) -> &[AvtPart] {
        &self.parts
    }

    /// The value when the template contains no expressions.
    pub fn as_static(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [AvtPart::Static(s)] => Some(s),
            _ => None,
        }
    }

    pub(crate) fn expressions(&self) -> impl Iterator<Item = &Expr> {
        self.parts.iter().filter_map(|p| match p {
            AvtPart::Dynamic(e) => Some(e),
            AvtPart::Static(_) => None,
        })
    }
}

/// Byte index of the `}` closing an embedded expression, skipping string literals.
fn expression_end(text: &str, start: usize) -> Option<usize> {
    let mut quote = None;
    for (offset, c) in text[start..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '}') => return Some(start + offset),
            _ => {}
        }
    }
    None
}

/// A name computed at run time (`stx:element`, `stx:attribute`).
#[derive(Debug, Clone)]
pub struct ComputedName {
    pub name: Avt,
    pub namespace: Option<Avt>,
    /// Bindings in scope at the instruction, used to resolve a prefixed result.
    pub namespaces: Arc<Namespaces>,
}

#[derive(Debug, Clone)]
pub struct WithParam {
    pub name: String,
    pub select: Expr,
}

/// `filter-method` and `filter-src` of a process instruction.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub method: Avt,
    pub src: Option<Avt>,
}

#[derive(Debug, Clone)]
pub enum ProcessKind {
    Children,
    SelfNode,
    Siblings {
        while_: Option<Pattern>,
        until: Option<Pattern>,
    },
    Attributes,
    Buffer {
        name: String,
    },
    Doc {
        href: Avt,
        base: Option<Avt>,
    },
}

impl ProcessKind {
    /// Directives that hand control back to the stream and resume later.
    pub fn suspends(&self) -> bool {
        matches!(
            self,
            ProcessKind::Children | ProcessKind::SelfNode | ProcessKind::Siblings { .. }
        )
    }

    pub fn element_name(&self) -> &'static str {
        match self {
            ProcessKind::Children => "process-children",
            ProcessKind::SelfNode => "process-self",
            ProcessKind::Siblings { .. } => "process-siblings",
            ProcessKind::Attributes => "process-attributes",
            ProcessKind::Buffer { .. } => "process-buffer",
            ProcessKind::Doc { .. } => "process-doc",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessCall {
    pub kind: ProcessKind,
    pub params: Vec<WithParam>,
    pub filter: Option<FilterSpec>,
    /// `group` attribute: match against this named group instead of the current one.
    pub group: Option<String>,
    pub location: Location,
}

/// How a variable, parameter or assignment gets its value.
#[derive(Debug, Clone)]
pub enum ValueSource {
    Select(Expr),
    /// The text produced by the instruction's content.
    Content(Vec<Instruction>),
    Empty,
}

#[derive(Debug, Clone)]
pub enum Instruction {
    /// A literal result element with its attribute value templates.
    LiteralElement {
        name: QName,
        attributes: Vec<(QName, Avt)>,
        body: Vec<Instruction>,
    },
    Element {
        name: ComputedName,
        body: Vec<Instruction>,
    },
    StartElement(ComputedName),
    EndElement(ComputedName),
    Attribute {
        name: ComputedName,
        value: ValueSource,
    },
    Text(String),
    ValueOf {
        select: Expr,
        separator: Option<Avt>,
    },
    Copy {
        attributes: Option<Pattern>,
        body: Vec<Instruction>,
    },
    Comment(ValueSource),
    ProcessingInstruction {
        target: Avt,
        value: ValueSource,
    },
    If {
        test: Expr,
        then: Vec<Instruction>,
        otherwise: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(Expr, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    ForEachItem {
        name: String,
        select: Expr,
        body: Vec<Instruction>,
    },
    While {
        test: Expr,
        body: Vec<Instruction>,
    },
    Variable {
        name: String,
        value: ValueSource,
        location: Location,
    },
    Param {
        name: String,
        value: ValueSource,
        required: bool,
        location: Location,
    },
    Assign {
        name: String,
        value: ValueSource,
        location: Location,
    },
    CallProcedure {
        name: QName,
        params: Vec<WithParam>,
        location: Location,
    },
    Process(ProcessCall),
    Buffer {
        name: String,
        body: Vec<Instruction>,
    },
    ResultBuffer {
        name: String,
        clear: bool,
        body: Vec<Instruction>,
        location: Location,
    },
    Message(ValueSource),
}

#[derive(Debug, Clone)]
pub struct Template {
    pub pattern: Pattern,
    pub priority: f64,
    pub group: GroupId,
    pub public: bool,
    pub body: Arc<Vec<Instruction>>,
    pub(crate) program: Arc<Program>,
    pub location: Location,
    /// The first template split from the same `stx:template` element.
    pub origin: TemplateId,
}

#[derive(Debug, Clone)]
pub struct Procedure {
    pub name: QName,
    pub group: GroupId,
    pub public: bool,
    pub body: Arc<Vec<Instruction>>,
    pub(crate) program: Arc<Program>,
    pub location: Location,
}

/// A group-level `stx:variable`. Only selects and static text are allowed here.
#[derive(Debug, Clone)]
pub struct GroupVariable {
    pub name: String,
    pub select: Option<Expr>,
    pub text: String,
    pub location: Location,
}

/// A top-level `stx:param`, bound from the host's parameters.
#[derive(Debug, Clone)]
pub struct GlobalParam {
    pub name: String,
    pub select: Option<Expr>,
    pub text: String,
    pub required: bool,
    pub location: Location,
}

/// A group-level `stx:buffer`. Its content outlives a single transformation.
#[derive(Debug, Clone)]
pub struct GroupBuffer {
    pub name: String,
    pub buffer: SharedBuffer,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub name: Option<String>,
    pub parent: Option<GroupId>,
    pub children: Vec<GroupId>,
    pub pass_through: PassThrough,
    pub templates: Vec<TemplateId>,
    pub procedures: Vec<ProcedureId>,
    pub variables: Vec<GroupVariable>,
    pub buffers: Vec<GroupBuffer>,
    pub location: Location,
}

impl Group {
    pub(crate) fn new(
        name: Option<String>,
        parent: Option<GroupId>,
        pass_through: PassThrough,
        location: Location,
    ) -> Self {
        Group {
            name,
            parent,
            children: Vec::new(),
            pass_through,
            templates: Vec::new(),
            procedures: Vec::new(),
            variables: Vec::new(),
            buffers: Vec::new(),
            location,
        }
    }
}

/// A template visible from a group, ranked for selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub template: TemplateId,
    pub priority: f64,
    /// 0 for the group's own templates and its children's public ones, then
    /// one more for each enclosing group.
    pub distance: usize,
}

impl Candidate {
    pub fn same_rank(&self, other: &Candidate) -> bool {
        self.priority == other.priority && self.distance == other.distance
    }
}

/// A compiled STX sheet.
#[derive(Debug)]
pub struct Sheet {
    pub(crate) groups: Vec<Group>,
    pub(crate) templates: Vec<Template>,
    pub(crate) procedures: Vec<Procedure>,
    pub(crate) params: Vec<GlobalParam>,
    /// Per group, every visible template sorted by priority then distance.
    pub(crate) candidates: Vec<Vec<Candidate>>,
    pub(crate) strip_space: bool,
    pub(crate) base_uri: Option<String>,
}

impl Sheet {
    pub const ROOT_GROUP: GroupId = 0;

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id]
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn template(&self, id: TemplateId) -> &Template {
        &self.templates[id]
    }

    pub fn procedures(&self) -> &[Procedure] {
        &self.procedures
    }

    pub fn procedure(&self, id: ProcedureId) -> &Procedure {
        &self.procedures[id]
    }

    pub fn params(&self) -> &[GlobalParam] {
        &self.params
    }

    pub fn strip_space(&self) -> bool {
        self.strip_space
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }

    pub fn group_by_name(&self, name: &str) -> Option<GroupId> {
        self.groups
            .iter()
            .position(|g| g.name.as_deref() == Some(name))
    }

    /// The group and its enclosing groups, innermost first.
    pub fn group_chain(&self, id: GroupId) -> impl Iterator<Item = GroupId> + '_ {
        std::iter::successors(Some(id), move |g| self.groups[*g].parent)
    }

    /// Finds a persistent buffer visible from `group`.
    pub fn buffer(&self, group: GroupId, name: &str) -> Option<&SharedBuffer> {
        self.group_chain(group).find_map(|g| {
            self.groups[g]
                .buffers
                .iter()
                .find(|b| b.name == name)
                .map(|b| &b.buffer)
        })
    }

    pub(crate) fn candidates(&self, group: GroupId) -> &[Candidate] {
        &self.candidates[group]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avt(text: &str) -> Avt {
        Avt::parse(text, &Namespaces::new()).unwrap()
    }

    #[test]
    fn test_static_avt() {
        assert_eq!(avt("plain").as_static(), Some("plain"));
        assert_eq!(avt("").as_static(), Some(""));
        assert_eq!(avt("{{x}}").as_static(), Some("{x}"));
    }

    #[test]
    fn test_dynamic_avt_parts() {
        let parsed = avt("item-{$n}-{concat('}', 'x')}");
        let kinds: Vec<_> = parsed
            .parts()
            .iter()
            .map(|p| match p {
                AvtPart::Static(s) => format!("s:{}", s),
                AvtPart::Dynamic(e) => format!("d:{}", e.text()),
            })
            .collect();
        assert_eq!(kinds, vec!["s:item-", "d:$n", "s:-", "d:concat('}', 'x')"]);
        assert!(parsed.as_static().is_none());
    }

    #[test]
    fn test_malformed_avt() {
        assert!(Avt::parse("a{b", &Namespaces::new()).is_err());
        assert!(Avt::parse("a}b", &Namespaces::new()).is_err());
    }

    #[test]
    fn test_pass_through_values() {
        assert_eq!(PassThrough::parse("text"), Some(PassThrough::Text));
        assert_eq!(PassThrough::parse("nope"), None);
        assert_eq!(PassThrough::default(), PassThrough::None);
    }
}
