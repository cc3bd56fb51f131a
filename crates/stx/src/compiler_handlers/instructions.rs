//! Handlers for output, control flow and `process-*` instructions.

use crate::ast::{FilterSpec, Instruction, ProcessCall, ProcessKind, WithParam};
use crate::compiler::{BuilderState, CompilerBuilder, optional, required, yes_no};
use crate::error::{Location, StxError};
use crate::util::OwnedAttributes;
use strix_stxpath::Expr;

impl CompilerBuilder {
    pub(crate) fn handle_instruction_end(
        &mut self,
        local: &str,
        attrs: OwnedAttributes,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        let instruction = match local {
            "value-of" => Instruction::ValueOf {
                select: self.expr(required(&attrs, "select", local, location)?, location)?,
                separator: match optional(&attrs, "separator") {
                    Some(sep) => Some(self.avt(sep, location)?),
                    None => None,
                },
            },
            "element" => Instruction::Element {
                name: self.computed_name(&attrs, local, location)?,
                body,
            },
            "start-element" => {
                self.expect_empty(&body, local, location)?;
                Instruction::StartElement(self.computed_name(&attrs, local, location)?)
            }
            "end-element" => {
                self.expect_empty(&body, local, location)?;
                Instruction::EndElement(self.computed_name(&attrs, local, location)?)
            }
            "attribute" => Instruction::Attribute {
                name: self.computed_name(&attrs, local, location)?,
                value: self.value_source(&attrs, body, local, location)?,
            },
            "copy" => Instruction::Copy {
                attributes: match optional(&attrs, "attributes") {
                    Some(pattern) => Some(self.pattern(pattern, location)?),
                    None => None,
                },
                body,
            },
            "comment" => Instruction::Comment(self.value_source(&attrs, body, local, location)?),
            "processing-instruction" => Instruction::ProcessingInstruction {
                target: self.avt(required(&attrs, "name", local, location)?, location)?,
                value: self.value_source(&attrs, body, local, location)?,
            },
            "if" => Instruction::If {
                test: self.expr(required(&attrs, "test", local, location)?, location)?,
                then: body,
                otherwise: Vec::new(),
            },
            "else" => return self.handle_else_end(body, location),
            "when" => return self.handle_when_end(&attrs, body, location),
            "otherwise" => return self.handle_otherwise_end(body, location),
            "for-each-item" => Instruction::ForEachItem {
                name: required(&attrs, "name", local, location)?.trim().to_string(),
                select: self.expr(required(&attrs, "select", local, location)?, location)?,
                body,
            },
            "while" => Instruction::While {
                test: self.expr(required(&attrs, "test", local, location)?, location)?,
                body,
            },
            "variable" => self.handle_variable_end(&attrs, body, location)?,
            "param" => self.handle_param_end(&attrs, body, location)?,
            "assign" => self.handle_assign_end(&attrs, body, location)?,
            "with-param" => return self.handle_with_param_end(&attrs, body, location),
            "buffer" => Instruction::Buffer {
                name: required(&attrs, "name", local, location)?.trim().to_string(),
                body,
            },
            "result-buffer" => Instruction::ResultBuffer {
                name: required(&attrs, "name", local, location)?.trim().to_string(),
                clear: yes_no(&attrs, "clear", false, location)?,
                body,
                location,
            },
            "message" => Instruction::Message(self.value_source(&attrs, body, local, location)?),
            other => {
                return Err(StxError::compile(
                    format!("unknown instruction stx:{}", other),
                    location,
                ));
            }
        };
        self.push_instruction(instruction);
        Ok(())
    }

    fn expect_empty(
        &self,
        body: &[Instruction],
        element: &str,
        location: Location,
    ) -> Result<(), StxError> {
        if body.is_empty() {
            Ok(())
        } else {
            Err(StxError::compile(
                format!("stx:{} must be empty", element),
                location,
            ))
        }
    }

    /// `stx:else` completes the `stx:if` right before it.
    fn handle_else_end(
        &mut self,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        let previous = self.instruction_stack.last_mut().and_then(|b| b.last_mut());
        match previous {
            Some(Instruction::If { otherwise, .. }) if otherwise.is_empty() => {
                *otherwise = body;
                Ok(())
            }
            _ => Err(StxError::compile(
                "stx:else must directly follow an stx:if",
                location,
            )),
        }
    }

    fn handle_when_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        let test = self.expr(required(attrs, "test", "when", location)?, location)?;
        match self.state_stack.last_mut() {
            Some(BuilderState::Choose {
                branches,
                otherwise: None,
                ..
            }) => {
                branches.push((test, body));
                Ok(())
            }
            _ => Err(StxError::compile(
                "stx:when must come before stx:otherwise",
                location,
            )),
        }
    }

    fn handle_otherwise_end(
        &mut self,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        match self.state_stack.last_mut() {
            Some(BuilderState::Choose { otherwise, .. }) if otherwise.is_none() => {
                *otherwise = Some(body);
                Ok(())
            }
            _ => Err(StxError::compile(
                "stx:choose can have only one stx:otherwise",
                location,
            )),
        }
    }

    pub(crate) fn handle_choose_end(
        &mut self,
        branches: Vec<(Expr, Vec<Instruction>)>,
        otherwise: Option<Vec<Instruction>>,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        self.expect_empty(&body, "choose", location)?;
        if branches.is_empty() {
            return Err(StxError::compile(
                "stx:choose needs at least one stx:when",
                location,
            ));
        }
        self.push_instruction(Instruction::Choose {
            branches,
            otherwise: otherwise.unwrap_or_default(),
        });
        Ok(())
    }

    /// `stx:call-procedure` and the `process-*` family.
    pub(crate) fn handle_call_end(
        &mut self,
        local: &str,
        attrs: OwnedAttributes,
        params: Vec<WithParam>,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        if !body.is_empty() {
            return Err(StxError::compile(
                format!("stx:{} may only contain stx:with-param", local),
                location,
            ));
        }
        if local == "call-procedure" {
            let name = self.qname(required(&attrs, "name", local, location)?, location)?;
            self.push_instruction(Instruction::CallProcedure {
                name,
                params,
                location,
            });
            return Ok(());
        }

        let kind = match local {
            "process-children" => ProcessKind::Children,
            "process-self" => ProcessKind::SelfNode,
            "process-siblings" => ProcessKind::Siblings {
                while_: match optional(&attrs, "while") {
                    Some(p) => Some(self.pattern(p, location)?),
                    None => None,
                },
                until: match optional(&attrs, "until") {
                    Some(p) => Some(self.pattern(p, location)?),
                    None => None,
                },
            },
            "process-attributes" => ProcessKind::Attributes,
            "process-buffer" => ProcessKind::Buffer {
                name: required(&attrs, "name", local, location)?.trim().to_string(),
            },
            "process-doc" => ProcessKind::Doc {
                href: self.avt(required(&attrs, "href", local, location)?, location)?,
                base: match optional(&attrs, "base") {
                    Some(base) => Some(self.avt(base, location)?),
                    None => None,
                },
            },
            other => {
                return Err(StxError::compile(
                    format!("unknown instruction stx:{}", other),
                    location,
                ));
            }
        };

        let filter = match (optional(&attrs, "filter-method"), optional(&attrs, "filter-src")) {
            (Some(method), src) => {
                if !matches!(
                    kind,
                    ProcessKind::Children | ProcessKind::Buffer { .. } | ProcessKind::Doc { .. }
                ) {
                    return Err(StxError::compile(
                        format!("stx:{} cannot use a filter", local),
                        location,
                    ));
                }
                Some(FilterSpec {
                    method: self.avt(method, location)?,
                    src: match src {
                        Some(src) => Some(self.avt(src, location)?),
                        None => None,
                    },
                })
            }
            (None, Some(_)) => {
                return Err(StxError::compile(
                    "filter-src needs a filter-method",
                    location,
                ));
            }
            (None, None) => None,
        };

        self.push_instruction(Instruction::Process(ProcessCall {
            kind,
            params,
            filter,
            group: optional(&attrs, "group").map(|g| g.trim().to_string()),
            location,
        }));
        Ok(())
    }
}
