use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Expression parse error in '{0}': {1}")]
    Parse(String, String),

    #[error("Undeclared namespace prefix '{0}'")]
    UnknownPrefix(String),

    #[error("Unknown function '{0}()'")]
    UnknownFunction(String),

    #[error("Function '{function}' error: {message}")]
    Function { function: String, message: String },

    #[error("Type error: {0}")]
    Type(String),

    #[error("Variable '${0}' is not in scope")]
    UnknownVariable(String),
}

impl ExprError {
    pub fn function(function: &str, message: impl Into<String>) -> Self {
        ExprError::Function {
            function: function.to_string(),
            message: message.into(),
        }
    }
}
