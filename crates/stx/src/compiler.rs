//! Builds a [`Sheet`] from STX markup by listening to the parser driver.
//!
//! The driver reports elements and text; the builder keeps a stack of
//! [`BuilderState`]s mirroring the open elements and a parallel stack of
//! instruction bodies. An element's instruction is assembled at its end tag,
//! once its body is known, and appended to the body of its parent.

use crate::ast::{
    Avt, ComputedName, GlobalParam, Group, GroupId, Instruction, PassThrough, Procedure, Sheet,
    Template, ValueSource,
};
use crate::error::{Location, StxError};
use crate::parser;
use crate::pattern::Pattern;
use crate::program::{Lowering, LoweringEnv};
use crate::util::{NamespaceScopes, OwnedAttributes, is_whitespace};
use std::sync::Arc;
use strix_stxpath::{Expr, Namespaces};
use strix_types::QName;

pub use crate::ast::STX_NAMESPACE;

/// The callbacks the parser driver uses to build a sheet.
pub trait SheetBuilder {
    fn start_element(
        &mut self,
        raw_name: &str,
        attrs: OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), StxError>;

    fn empty_element(
        &mut self,
        raw_name: &str,
        attrs: OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), StxError> {
        self.start_element(raw_name, attrs, pos, source)?;
        self.end_element(raw_name, pos, source)
    }

    fn end_element(&mut self, raw_name: &str, pos: usize, source: &str) -> Result<(), StxError>;

    /// Character data between two tags, already merged and unescaped.
    fn text(&mut self, text: String) -> Result<(), StxError>;
}

/// Compiles STX markup into a sheet.
pub fn compile(source: &str) -> Result<Sheet, StxError> {
    compile_with_base(source, None)
}

/// Compiles a sheet that was loaded from `base_uri`. Relative `stx:process-doc`
/// and `filter-src` locations resolve against it.
pub fn compile_with_base(source: &str, base_uri: Option<&str>) -> Result<Sheet, StxError> {
    let mut builder = CompilerBuilder::new(base_uri);
    parser::parse_sheet_content(source, &mut builder)?;
    builder.finalize()
}

/// The current state of the builder, one entry per open sheet element.
pub(crate) enum BuilderState {
    /// Outside of `stx:transform`.
    Start,
    /// `stx:transform` or `stx:group`: declarations go to this group.
    Group(GroupId),
    Template {
        attrs: OwnedAttributes,
        location: Location,
    },
    Procedure {
        attrs: OwnedAttributes,
        location: Location,
    },
    LiteralElement {
        name: QName,
        attrs: OwnedAttributes,
    },
    /// An STX instruction, assembled from its attributes and body at its end tag.
    Instruction {
        local: String,
        attrs: OwnedAttributes,
        location: Location,
    },
    /// `stx:text` and `stx:cdata`: all character data is kept.
    Text,
    Choose {
        branches: Vec<(Expr, Vec<Instruction>)>,
        otherwise: Option<Vec<Instruction>>,
        location: Location,
    },
    /// An instruction that takes `stx:with-param` children.
    Call {
        local: String,
        attrs: OwnedAttributes,
        location: Location,
        params: Vec<crate::ast::WithParam>,
    },
    /// Foreign elements at the top level. Their content is ignored.
    Ignored,
}

/// A template before its body is lowered.
pub(crate) struct TemplateDecl {
    pub pattern: Pattern,
    pub priority: f64,
    pub group: GroupId,
    pub public: bool,
    pub body: Arc<Vec<Instruction>>,
    pub location: Location,
    pub origin: usize,
}

pub(crate) struct ProcedureDecl {
    pub name: QName,
    pub group: GroupId,
    pub public: bool,
    pub body: Arc<Vec<Instruction>>,
    pub location: Location,
}

/// A stateful builder that constructs a [`Sheet`] from parser events.
pub struct CompilerBuilder {
    pub(crate) groups: Vec<Group>,
    pub(crate) templates: Vec<TemplateDecl>,
    pub(crate) procedures: Vec<ProcedureDecl>,
    pub(crate) params: Vec<GlobalParam>,
    pub(crate) strip_space: bool,
    pub(crate) base_uri: Option<String>,
    pub(crate) namespaces: NamespaceScopes,
    pub(crate) instruction_stack: Vec<Vec<Instruction>>,
    pub(crate) state_stack: Vec<BuilderState>,
}

impl CompilerBuilder {
    fn new(base_uri: Option<&str>) -> Self {
        Self {
            groups: Vec::new(),
            templates: Vec::new(),
            procedures: Vec::new(),
            params: Vec::new(),
            strip_space: false,
            base_uri: base_uri.map(str::to_string),
            namespaces: NamespaceScopes::new(),
            instruction_stack: vec![Vec::new()],
            state_stack: vec![BuilderState::Start],
        }
    }

    /// Lowers every body and ranks the templates visible from each group.
    fn finalize(self) -> Result<Sheet, StxError> {
        if self.groups.is_empty() {
            return Err(StxError::compile(
                "the sheet has no stx:transform element",
                Location::default(),
            ));
        }
        self.check_duplicate_templates()?;

        let procedure_index: Vec<(QName, GroupId, bool)> = self
            .procedures
            .iter()
            .map(|p| (p.name.clone(), p.group, p.public))
            .collect();
        let env = LoweringEnv {
            groups: &self.groups,
            procedures: &procedure_index,
            params: &self.params,
        };

        let mut templates = Vec::with_capacity(self.templates.len());
        for decl in &self.templates {
            let program = Lowering::lower(&env, decl.group, decl.location, &decl.body)?;
            templates.push(Template {
                pattern: decl.pattern.clone(),
                priority: decl.priority,
                group: decl.group,
                public: decl.public,
                body: decl.body.clone(),
                program: Arc::new(program),
                location: decl.location,
                origin: decl.origin,
            });
        }

        let mut procedures = Vec::with_capacity(self.procedures.len());
        for decl in &self.procedures {
            let program = Lowering::lower(&env, decl.group, decl.location, &decl.body)?;
            procedures.push(Procedure {
                name: decl.name.clone(),
                group: decl.group,
                public: decl.public,
                body: decl.body.clone(),
                program: Arc::new(program),
                location: decl.location,
            });
        }

        let candidates = (0..self.groups.len())
            .map(|g| self.rank_candidates(g))
            .collect();

        log::debug!(
            "Compiled sheet: {} group(s), {} template(s), {} procedure(s)",
            self.groups.len(),
            templates.len(),
            procedures.len()
        );

        Ok(Sheet {
            groups: self.groups,
            templates,
            procedures,
            params: self.params,
            candidates,
            strip_space: self.strip_space,
            base_uri: self.base_uri,
        })
    }

    pub(crate) fn current_group(&self) -> Option<GroupId> {
        self.state_stack.iter().rev().find_map(|s| match s {
            BuilderState::Group(id) => Some(*id),
            _ => None,
        })
    }

    pub(crate) fn push_instruction(&mut self, instruction: Instruction) {
        if let Some(body) = self.instruction_stack.last_mut() {
            body.push(instruction);
        }
    }

    pub(crate) fn current_namespaces(&self) -> Arc<Namespaces> {
        self.namespaces.current().clone()
    }

    pub(crate) fn expr(&self, text: &str, location: Location) -> Result<Expr, StxError> {
        Expr::parse(text, self.namespaces.current()).map_err(|e| {
            StxError::compile(format!("invalid expression '{}': {}", text, e), location)
        })
    }

    pub(crate) fn avt(&self, text: &str, location: Location) -> Result<Avt, StxError> {
        Avt::parse(text, self.namespaces.current()).map_err(|e| {
            StxError::compile(format!("invalid attribute value '{}': {}", text, e), location)
        })
    }

    pub(crate) fn pattern(&self, text: &str, location: Location) -> Result<Pattern, StxError> {
        Pattern::parse(text, self.namespaces.current()).map_err(|e| {
            StxError::compile(format!("invalid pattern '{}': {}", text, e), location)
        })
    }

    pub(crate) fn qname(&self, text: &str, location: Location) -> Result<QName, StxError> {
        self.namespaces
            .attribute_name(text.trim())
            .map_err(|e| StxError::compile(e.to_string(), location))
    }

    /// `name` and `namespace` of `stx:element`, `stx:attribute` and friends.
    pub(crate) fn computed_name(
        &self,
        attrs: &OwnedAttributes,
        element: &str,
        location: Location,
    ) -> Result<ComputedName, StxError> {
        let name = required(attrs, "name", element, location)?;
        let namespace = match optional(attrs, "namespace") {
            Some(ns) => Some(self.avt(ns, location)?),
            None => None,
        };
        Ok(ComputedName {
            name: self.avt(name, location)?,
            namespace,
            namespaces: self.current_namespaces(),
        })
    }

    /// The value of a variable-like instruction: `select` or content, not both.
    pub(crate) fn value_source(
        &self,
        attrs: &OwnedAttributes,
        body: Vec<Instruction>,
        element: &str,
        location: Location,
    ) -> Result<ValueSource, StxError> {
        match (optional(attrs, "select"), body.is_empty()) {
            (Some(select), true) => Ok(ValueSource::Select(self.expr(select, location)?)),
            (Some(_), false) => Err(StxError::compile(
                format!("stx:{} cannot have both a select attribute and content", element),
                location,
            )),
            (None, false) => Ok(ValueSource::Content(body)),
            (None, true) => Ok(ValueSource::Empty),
        }
    }

    pub(crate) fn pass_through(
        &self,
        attrs: &OwnedAttributes,
        inherited: PassThrough,
        location: Location,
    ) -> Result<PassThrough, StxError> {
        match optional(attrs, "pass-through") {
            Some(value) => PassThrough::parse(value).ok_or_else(|| {
                StxError::compile(
                    format!("pass-through must be none, text or all, not '{}'", value),
                    location,
                )
            }),
            None => Ok(inherited),
        }
    }
}

impl SheetBuilder for CompilerBuilder {
    fn start_element(
        &mut self,
        raw_name: &str,
        attrs: OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), StxError> {
        let location = Location::from_offset(source, pos);
        self.namespaces.push(&attrs);
        let name = self
            .namespaces
            .element_name(raw_name)
            .map_err(|e| StxError::compile(e.to_string(), location))?;
        self.instruction_stack.push(Vec::new());

        let state = if name.namespace() == Some(STX_NAMESPACE) {
            self.stx_element_start(&name.local_name, attrs, location)?
        } else {
            self.foreign_element_start(name, attrs, location)?
        };
        self.state_stack.push(state);
        Ok(())
    }

    fn end_element(&mut self, raw_name: &str, pos: usize, source: &str) -> Result<(), StxError> {
        let location = Location::from_offset(source, pos);
        let state = self.state_stack.pop().ok_or_else(|| {
            StxError::compile(format!("unexpected end tag '{}'", raw_name), location)
        })?;
        let body = self.instruction_stack.pop().unwrap_or_default();

        match state {
            BuilderState::Start | BuilderState::Ignored | BuilderState::Group(_) => {}
            BuilderState::Template { attrs, location } => {
                self.handle_template_end(attrs, body, location)?
            }
            BuilderState::Procedure { attrs, location } => {
                self.handle_procedure_end(attrs, body, location)?
            }
            BuilderState::LiteralElement { name, attrs } => {
                self.handle_literal_result_element_end(name, attrs, body, location)?
            }
            BuilderState::Text => {
                let text = body
                    .into_iter()
                    .filter_map(|i| match i {
                        Instruction::Text(t) => Some(t),
                        _ => None,
                    })
                    .collect::<String>();
                if !text.is_empty() {
                    self.push_instruction(Instruction::Text(text));
                }
            }
            BuilderState::Choose {
                branches,
                otherwise,
                location,
            } => self.handle_choose_end(branches, otherwise, body, location)?,
            BuilderState::Call {
                local,
                attrs,
                location,
                params,
            } => self.handle_call_end(&local, attrs, params, body, location)?,
            BuilderState::Instruction {
                local,
                attrs,
                location,
            } => {
                if matches!(self.state_stack.last(), Some(BuilderState::Group(_))) {
                    self.handle_declaration_end(&local, attrs, body, location)?
                } else {
                    self.handle_instruction_end(&local, attrs, body, location)?
                }
            }
        }
        self.namespaces.pop();
        Ok(())
    }

    fn text(&mut self, text: String) -> Result<(), StxError> {
        match self.state_stack.last() {
            Some(BuilderState::Text) => {
                self.push_instruction(Instruction::Text(text));
                Ok(())
            }
            _ if is_whitespace(&text) => Ok(()),
            Some(
                BuilderState::Template { .. }
                | BuilderState::Procedure { .. }
                | BuilderState::LiteralElement { .. }
                | BuilderState::Instruction { .. },
            ) => {
                self.push_instruction(Instruction::Text(text));
                Ok(())
            }
            Some(BuilderState::Ignored) => Ok(()),
            _ => Err(StxError::compile(
                format!("text '{}' is not allowed here", text.trim()),
                Location::default(),
            )),
        }
    }
}

pub(crate) fn optional<'a>(attrs: &'a OwnedAttributes, name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

pub(crate) fn required<'a>(
    attrs: &'a OwnedAttributes,
    name: &str,
    element: &str,
    location: Location,
) -> Result<&'a str, StxError> {
    optional(attrs, name).ok_or_else(|| {
        StxError::compile(
            format!("stx:{} requires a '{}' attribute", element, name),
            location,
        )
    })
}

pub(crate) fn yes_no(
    attrs: &OwnedAttributes,
    name: &str,
    default: bool,
    location: Location,
) -> Result<bool, StxError> {
    match optional(attrs, name).map(str::trim) {
        None => Ok(default),
        Some("yes") => Ok(true),
        Some("no") => Ok(false),
        Some(other) => Err(StxError::compile(
            format!("'{}' must be yes or no, not '{}'", name, other),
            location,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r#"<stx:transform xmlns:stx="http://stx.sourceforge.net/2002/ns" version="1.0""#;

    fn sheet(body: &str) -> Result<Sheet, StxError> {
        compile(&format!("{}>{}</stx:transform>", HEADER, body))
    }

    #[test]
    fn test_union_patterns_become_separate_templates() {
        let sheet = sheet(r#"<stx:template match="a|b/c">x</stx:template>"#).unwrap();
        let templates = sheet.templates();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].pattern.text(), "a");
        assert_eq!(templates[0].priority, 0.0);
        assert_eq!(templates[1].pattern.text(), "b/c");
        assert_eq!(templates[1].priority, 0.5);
    }

    #[test]
    fn test_nested_groups_and_visibility() {
        let sheet = sheet(
            r#"
            <stx:template match="a"/>
            <stx:group name="inner" pass-through="text">
              <stx:template match="b"/>
              <stx:template match="c" public="yes"/>
            </stx:group>"#,
        )
        .unwrap();
        assert_eq!(sheet.groups().len(), 2);
        let inner = sheet.group_by_name("inner").unwrap();
        assert_eq!(sheet.group(inner).parent, Some(Sheet::ROOT_GROUP));
        assert_eq!(sheet.group(inner).pass_through, PassThrough::Text);

        // root sees its own template and the public one of its child group
        let root: Vec<_> = sheet
            .candidates(Sheet::ROOT_GROUP)
            .iter()
            .map(|c| sheet.template(c.template).pattern.text().to_string())
            .collect();
        assert_eq!(root, vec!["a", "c"]);

        // the inner group sees everything, its parent's templates one step away
        let inner_candidates = sheet.candidates(inner);
        assert_eq!(inner_candidates.len(), 3);
        let a = inner_candidates
            .iter()
            .find(|c| sheet.template(c.template).pattern.text() == "a")
            .unwrap();
        assert_eq!(a.distance, 1);
    }

    #[test]
    fn test_candidates_ordered_by_priority() {
        let sheet = sheet(
            r#"
            <stx:template match="item" priority="1"/>
            <stx:template match="item" priority="2"/>
            <stx:template match="*"/>"#,
        )
        .unwrap();
        let priorities: Vec<f64> = sheet
            .candidates(Sheet::ROOT_GROUP)
            .iter()
            .map(|c| c.priority)
            .collect();
        assert_eq!(priorities, vec![2.0, 1.0, -0.5]);
    }

    #[test]
    fn test_duplicate_template_is_rejected() {
        let err = sheet(
            r#"<stx:template match="a">1</stx:template>
               <stx:template match="a">2</stx:template>"#,
        )
        .unwrap_err();
        assert!(matches!(err, StxError::Compile { .. }));
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn test_else_attaches_to_preceding_if() {
        let sheet = sheet(
            r#"<stx:template match="a">
                 <stx:if test="1">yes</stx:if>
                 <stx:else>no</stx:else>
               </stx:template>"#,
        )
        .unwrap();
        match sheet.template(0).body.as_slice() {
            [Instruction::If { otherwise, .. }] => assert_eq!(otherwise.len(), 1),
            other => panic!("unexpected body {:?}", other),
        }

        assert!(sheet_err(r#"<stx:template match="a"><stx:else/></stx:template>"#));
    }

    fn sheet_err(body: &str) -> bool {
        sheet(body).is_err()
    }

    #[test]
    fn test_structural_errors() {
        assert!(compile("<doc/>").is_err());
        assert!(sheet_err(r#"<stx:template/>"#));
        assert!(sheet_err(r#"<stx:template match="a"><stx:frobnicate/></stx:template>"#));
        assert!(sheet_err(
            r#"<stx:template match="a"><stx:value-of select="$nope"/></stx:template>"#
        ));
        assert!(sheet_err(
            r#"<stx:group name="g"/><stx:group name="g"/>"#
        ));
        assert!(sheet_err(
            r#"<stx:template match="a"><stx:process-children group="missing"/></stx:template>"#
        ));
    }

    #[test]
    fn test_top_level_declarations() {
        let sheet = sheet(
            r#"
            <stx:param name="title" select="'Untitled'"/>
            <stx:param name="mode" required="yes"/>
            <stx:variable name="count" select="0"/>
            <stx:variable name="label">total</stx:variable>
            <stx:buffer name="seen"/>
            <stx:procedure name="emit"><stx:value-of select="$count"/></stx:procedure>"#,
        )
        .unwrap();
        assert_eq!(sheet.params().len(), 2);
        assert!(sheet.params()[1].required);
        let root = sheet.group(Sheet::ROOT_GROUP);
        assert_eq!(root.variables.len(), 2);
        assert_eq!(root.variables[1].text, "total");
        assert!(sheet.buffer(Sheet::ROOT_GROUP, "seen").is_some());
        assert_eq!(sheet.procedures().len(), 1);
    }

    #[test]
    fn test_literal_elements_keep_namespaces_and_avts() {
        let sheet = sheet(
            r#"<stx:template match="a" xmlns:h="urn:html">
                 <h:p class="c-{name()}" xmlns:x="urn:unused">t</h:p>
               </stx:template>"#,
        )
        .unwrap();
        match sheet.template(0).body.as_slice() {
            [Instruction::LiteralElement { name, attributes, body }] => {
                assert_eq!(name.namespace(), Some("urn:html"));
                assert_eq!(attributes.len(), 1);
                assert!(attributes[0].1.as_static().is_none());
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected body {:?}", other),
        }
    }
}
