//! Handlers for `stx:transform`, `stx:group`, `stx:template`, `stx:procedure`
//! and the group-level declarations.

use crate::ast::{
    Candidate, GlobalParam, Group, GroupBuffer, GroupId, GroupVariable, Instruction, PassThrough,
    Sheet,
};
use crate::buffer::Buffer;
use crate::compiler::{
    BuilderState, CompilerBuilder, ProcedureDecl, TemplateDecl, optional, required, yes_no,
};
use crate::error::{Location, StxError};
use crate::util::{OwnedAttributes, is_namespace_declaration};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use strix_stxpath::Expr;

const TRANSFORM_ATTRIBUTES: &[&str] = &[
    "version",
    "pass-through",
    "strip-space",
    "exclude-result-prefixes",
    "output-encoding",
    "output-method",
    "recognize-cdata",
];

impl CompilerBuilder {
    pub(crate) fn handle_transform_start(
        &mut self,
        attrs: &OwnedAttributes,
        location: Location,
    ) -> Result<BuilderState, StxError> {
        for (key, _) in attrs {
            if !is_namespace_declaration(key) && !TRANSFORM_ATTRIBUTES.contains(&key.as_str()) {
                log::warn!("Ignoring unknown attribute '{}' on stx:transform", key);
            }
        }
        let pass_through = self.pass_through(attrs, PassThrough::None, location)?;
        self.strip_space = yes_no(attrs, "strip-space", false, location)?;
        self.groups
            .push(Group::new(None, None, pass_through, location));
        Ok(BuilderState::Group(Sheet::ROOT_GROUP))
    }

    /// Nested groups inherit the pass-through policy of their parent.
    pub(crate) fn handle_group_start(
        &mut self,
        parent: GroupId,
        attrs: &OwnedAttributes,
        location: Location,
    ) -> Result<BuilderState, StxError> {
        let name = optional(attrs, "name").map(|n| n.trim().to_string());
        if let Some(name) = &name {
            if self.groups.iter().any(|g| g.name.as_ref() == Some(name)) {
                return Err(StxError::compile(
                    format!("a group named '{}' is already defined", name),
                    location,
                ));
            }
        }
        let inherited = self.groups[parent].pass_through;
        let pass_through = self.pass_through(attrs, inherited, location)?;
        let id = self.groups.len();
        self.groups
            .push(Group::new(name, Some(parent), pass_through, location));
        self.groups[parent].children.push(id);
        Ok(BuilderState::Group(id))
    }

    fn enclosing_group(&self, element: &str, location: Location) -> Result<GroupId, StxError> {
        self.current_group().ok_or_else(|| {
            StxError::compile(format!("stx:{} outside of stx:transform", element), location)
        })
    }

    /// Each alternative of a union pattern becomes a template of its own, with
    /// its own default priority.
    pub(crate) fn handle_template_end(
        &mut self,
        attrs: OwnedAttributes,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        let group = self.enclosing_group("template", location)?;
        let pattern = self.pattern(required(&attrs, "match", "template", location)?, location)?;
        let priority = match optional(&attrs, "priority") {
            Some(p) => Some(p.trim().parse::<f64>().map_err(|_| {
                StxError::compile(format!("priority '{}' is not a number", p), location)
            })?),
            None => None,
        };
        let public = yes_no(&attrs, "public", group == Sheet::ROOT_GROUP, location)?;
        let body = Arc::new(body);

        let origin = self.templates.len();
        for alternative in pattern.alternatives() {
            let id = self.templates.len();
            self.templates.push(TemplateDecl {
                priority: priority.unwrap_or_else(|| alternative.default_priority()),
                pattern: alternative,
                group,
                public,
                body: body.clone(),
                location,
                origin,
            });
            self.groups[group].templates.push(id);
        }
        Ok(())
    }

    pub(crate) fn handle_procedure_end(
        &mut self,
        attrs: OwnedAttributes,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        let group = self.enclosing_group("procedure", location)?;
        let name = self.qname(required(&attrs, "name", "procedure", location)?, location)?;
        if self
            .procedures
            .iter()
            .any(|p| p.group == group && p.name == name)
        {
            return Err(StxError::compile(
                format!("procedure '{}' is already defined in this group", name),
                location,
            ));
        }
        let public = yes_no(&attrs, "public", group == Sheet::ROOT_GROUP, location)?;
        let id = self.procedures.len();
        self.procedures.push(ProcedureDecl {
            name,
            group,
            public,
            body: Arc::new(body),
            location,
        });
        self.groups[group].procedures.push(id);
        Ok(())
    }

    /// `stx:variable`, `stx:param` and `stx:buffer` directly inside a group.
    pub(crate) fn handle_declaration_end(
        &mut self,
        local: &str,
        attrs: OwnedAttributes,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        let group = self.enclosing_group(local, location)?;
        let name = required(&attrs, "name", local, location)?.trim().to_string();

        match local {
            "variable" => {
                if self.groups[group].variables.iter().any(|v| v.name == name) {
                    return Err(StxError::compile(
                        format!("variable '{}' is already declared in this group", name),
                        location,
                    ));
                }
                let (select, text) = self.declared_value(&attrs, body, local, location)?;
                self.groups[group].variables.push(GroupVariable {
                    name,
                    select,
                    text,
                    location,
                });
            }
            "param" => {
                if group != Sheet::ROOT_GROUP {
                    return Err(StxError::compile(
                        "parameters of the sheet belong directly in stx:transform",
                        location,
                    ));
                }
                if self.params.iter().any(|p| p.name == name) {
                    return Err(StxError::compile(
                        format!("parameter '{}' is already declared", name),
                        location,
                    ));
                }
                let required = yes_no(&attrs, "required", false, location)?;
                let (select, text) = self.declared_value(&attrs, body, local, location)?;
                self.params.push(GlobalParam {
                    name,
                    select,
                    text,
                    required,
                    location,
                });
            }
            "buffer" => {
                if !body.is_empty() {
                    return Err(StxError::compile(
                        format!("group buffer '{}' cannot have content", name),
                        location,
                    ));
                }
                if self.groups[group].buffers.iter().any(|b| b.name == name) {
                    return Err(StxError::compile(
                        format!("buffer '{}' is already declared in this group", name),
                        location,
                    ));
                }
                self.groups[group].buffers.push(GroupBuffer {
                    name,
                    buffer: Arc::new(Mutex::new(Buffer::new())),
                });
            }
            other => {
                return Err(StxError::compile(
                    format!("stx:{} is not allowed at the top level", other),
                    location,
                ));
            }
        }
        Ok(())
    }

    /// Group-level values are evaluated once per document, before any template
    /// runs, so only a select or plain text is allowed.
    fn declared_value(
        &self,
        attrs: &OwnedAttributes,
        body: Vec<Instruction>,
        element: &str,
        location: Location,
    ) -> Result<(Option<Expr>, String), StxError> {
        let mut text = String::new();
        for instruction in body {
            match instruction {
                Instruction::Text(t) => text.push_str(&t),
                _ => {
                    return Err(StxError::compile(
                        format!("a top-level stx:{} may only contain text", element),
                        location,
                    ));
                }
            }
        }
        match optional(attrs, "select") {
            Some(_) if !text.is_empty() => Err(StxError::compile(
                format!("stx:{} cannot have both a select attribute and content", element),
                location,
            )),
            Some(select) => Ok((Some(self.expr(select, location)?), text)),
            None => Ok((None, text)),
        }
    }

    /// The same pattern twice at the same priority in one group can never be
    /// told apart.
    pub(crate) fn check_duplicate_templates(&self) -> Result<(), StxError> {
        for (i, later) in self.templates.iter().enumerate() {
            if let Some(earlier) = self.templates[..i].iter().find(|t| {
                t.group == later.group
                    && t.priority == later.priority
                    && t.pattern.text() == later.pattern.text()
            }) {
                return Err(StxError::compile(
                    format!(
                        "template '{}' with priority {} is already defined at {}",
                        later.pattern.text(),
                        later.priority,
                        earlier.location
                    ),
                    later.location,
                ));
            }
        }
        Ok(())
    }

    /// Templates visible from `group`: its own and the public ones of its child
    /// groups, then the same for each enclosing group one step further away.
    pub(crate) fn rank_candidates(&self, group: GroupId) -> Vec<Candidate> {
        let chain = std::iter::successors(Some(group), |g| self.groups[*g].parent);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for (distance, owner) in chain.enumerate() {
            let own = self.groups[owner].templates.iter().copied();
            let from_children = self.groups[owner]
                .children
                .iter()
                .flat_map(|child| self.groups[*child].templates.iter().copied())
                .filter(|t| self.templates[*t].public);
            for template in own.chain(from_children) {
                if seen.insert(template) {
                    candidates.push(Candidate {
                        template,
                        priority: self.templates[template].priority,
                        distance,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then(a.distance.cmp(&b.distance))
        });
        candidates
    }
}
