pub(super) mod instructions;
pub(super) mod sheet;
pub(super) mod variables;

use crate::ast::{Instruction, STX_NAMESPACE};
use crate::compiler::{BuilderState, CompilerBuilder};
use crate::error::{Location, StxError};
use crate::util::{OwnedAttributes, is_namespace_declaration};
use strix_types::QName;

/// Instructions that collect an ordinary body.
const BODY_INSTRUCTIONS: &[&str] = &[
    "value-of",
    "element",
    "start-element",
    "end-element",
    "attribute",
    "copy",
    "comment",
    "processing-instruction",
    "if",
    "else",
    "for-each-item",
    "while",
    "variable",
    "param",
    "assign",
    "buffer",
    "result-buffer",
    "message",
];

/// Instructions that take `stx:with-param` children.
const CALL_INSTRUCTIONS: &[&str] = &[
    "call-procedure",
    "process-children",
    "process-self",
    "process-siblings",
    "process-attributes",
    "process-buffer",
    "process-doc",
];

impl CompilerBuilder {
    pub(crate) fn stx_element_start(
        &mut self,
        local: &str,
        attrs: OwnedAttributes,
        location: Location,
    ) -> Result<BuilderState, StxError> {
        let not_allowed = |context: &str| {
            StxError::compile(format!("stx:{} is not allowed {}", local, context), location)
        };
        match self.state_stack.last() {
            Some(BuilderState::Start) if local == "transform" => {
                self.handle_transform_start(&attrs, location)
            }
            Some(BuilderState::Start) => Err(not_allowed("as the root element")),
            Some(BuilderState::Group(group)) => {
                let group = *group;
                match local {
                    "group" => self.handle_group_start(group, &attrs, location),
                    "template" => Ok(BuilderState::Template { attrs, location }),
                    "procedure" => Ok(BuilderState::Procedure { attrs, location }),
                    "variable" | "param" | "buffer" => Ok(BuilderState::Instruction {
                        local: local.to_string(),
                        attrs,
                        location,
                    }),
                    _ => Err(not_allowed("at the top level")),
                }
            }
            Some(BuilderState::Ignored) => Ok(BuilderState::Ignored),
            Some(BuilderState::Text) => Err(not_allowed("in text content")),
            Some(BuilderState::Choose { .. }) => match local {
                "when" | "otherwise" => Ok(BuilderState::Instruction {
                    local: local.to_string(),
                    attrs,
                    location,
                }),
                _ => Err(not_allowed("in stx:choose")),
            },
            Some(BuilderState::Call { local: call, .. }) => match local {
                "with-param" => Ok(BuilderState::Instruction {
                    local: local.to_string(),
                    attrs,
                    location,
                }),
                _ => Err(not_allowed(&format!("in stx:{}", call))),
            },
            _ => self.instruction_start(local, attrs, location),
        }
    }

    fn instruction_start(
        &mut self,
        local: &str,
        attrs: OwnedAttributes,
        location: Location,
    ) -> Result<BuilderState, StxError> {
        match local {
            "text" | "cdata" => Ok(BuilderState::Text),
            "choose" => Ok(BuilderState::Choose {
                branches: Vec::new(),
                otherwise: None,
                location,
            }),
            _ if CALL_INSTRUCTIONS.contains(&local) => Ok(BuilderState::Call {
                local: local.to_string(),
                attrs,
                location,
                params: Vec::new(),
            }),
            _ if BODY_INSTRUCTIONS.contains(&local) => Ok(BuilderState::Instruction {
                local: local.to_string(),
                attrs,
                location,
            }),
            "when" | "otherwise" | "with-param" => Err(StxError::compile(
                format!("stx:{} is not allowed here", local),
                location,
            )),
            _ => Err(StxError::compile(
                format!("unknown instruction stx:{}", local),
                location,
            )),
        }
    }

    pub(crate) fn foreign_element_start(
        &mut self,
        name: QName,
        attrs: OwnedAttributes,
        location: Location,
    ) -> Result<BuilderState, StxError> {
        match self.state_stack.last() {
            Some(BuilderState::Start) => Err(StxError::compile(
                format!("the root element must be stx:transform, not '{}'", name),
                location,
            )),
            Some(BuilderState::Group(_)) => {
                log::warn!("Ignoring top-level element '{}' at {}", name, location);
                Ok(BuilderState::Ignored)
            }
            Some(BuilderState::Ignored) => Ok(BuilderState::Ignored),
            Some(
                BuilderState::Text | BuilderState::Choose { .. } | BuilderState::Call { .. },
            ) => Err(StxError::compile(
                format!("element '{}' is not allowed here", name),
                location,
            )),
            _ => Ok(BuilderState::LiteralElement { name, attrs }),
        }
    }

    /// Attributes become value templates. Namespace declarations and attributes
    /// in the STX namespace are not copied.
    pub(crate) fn handle_literal_result_element_end(
        &mut self,
        name: QName,
        attrs: OwnedAttributes,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        let mut attributes = Vec::new();
        for (key, value) in &attrs {
            if is_namespace_declaration(key) {
                continue;
            }
            let attr_name = self.qname(key, location)?;
            if attr_name.namespace() == Some(STX_NAMESPACE) {
                continue;
            }
            attributes.push((attr_name, self.avt(value, location)?));
        }
        self.push_instruction(Instruction::LiteralElement {
            name,
            attributes,
            body,
        });
        Ok(())
    }
}
