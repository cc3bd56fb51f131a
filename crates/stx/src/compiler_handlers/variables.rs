//! Handlers for `stx:variable`, `stx:param`, `stx:assign` and `stx:with-param`
//! inside template and procedure bodies.

use crate::ast::{Instruction, WithParam};
use crate::compiler::{BuilderState, CompilerBuilder, optional, required, yes_no};
use crate::error::{Location, StxError};
use crate::util::OwnedAttributes;
use strix_stxpath::{Expr, Expression, Namespaces};

impl CompilerBuilder {
    pub(crate) fn handle_variable_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<Instruction, StxError> {
        Ok(Instruction::Variable {
            name: required(attrs, "name", "variable", location)?.trim().to_string(),
            value: self.value_source(attrs, body, "variable", location)?,
            location,
        })
    }

    pub(crate) fn handle_param_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<Instruction, StxError> {
        Ok(Instruction::Param {
            name: required(attrs, "name", "param", location)?.trim().to_string(),
            value: self.value_source(attrs, body, "param", location)?,
            required: yes_no(attrs, "required", false, location)?,
            location,
        })
    }

    pub(crate) fn handle_assign_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<Instruction, StxError> {
        Ok(Instruction::Assign {
            name: required(attrs, "name", "assign", location)?.trim().to_string(),
            value: self.value_source(attrs, body, "assign", location)?,
            location,
        })
    }

    /// Adds a parameter to the enclosing call. Text content stands for a string.
    pub(crate) fn handle_with_param_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<Instruction>,
        location: Location,
    ) -> Result<(), StxError> {
        let name = required(attrs, "name", "with-param", location)?
            .trim()
            .to_string();
        let select = match optional(attrs, "select") {
            Some(_) if !body.is_empty() => {
                return Err(StxError::compile(
                    "stx:with-param cannot have both a select attribute and content",
                    location,
                ));
            }
            Some(select) => self.expr(select, location)?,
            None => string_literal(&static_text(body, location)?, location)?,
        };

        match self.state_stack.last_mut() {
            Some(BuilderState::Call { params, .. }) => {
                if params.iter().any(|p| p.name == name) {
                    return Err(StxError::compile(
                        format!("parameter '{}' is passed twice", name),
                        location,
                    ));
                }
                params.push(WithParam { name, select });
                Ok(())
            }
            _ => Err(StxError::compile(
                "stx:with-param must be a direct child of stx:call-procedure or a process instruction",
                location,
            )),
        }
    }
}

fn static_text(body: Vec<Instruction>, location: Location) -> Result<String, StxError> {
    body.into_iter()
        .map(|instruction| match instruction {
            Instruction::Text(text) => Ok(text),
            _ => Err(StxError::compile(
                "stx:with-param content may only be text",
                location,
            )),
        })
        .collect()
}

fn string_literal(text: &str, location: Location) -> Result<Expr, StxError> {
    Expr::from_ast(
        &Expression::Literal(text.to_string()),
        text,
        &Namespaces::new(),
    )
    .map_err(|e| StxError::compile(e.to_string(), location))
}
