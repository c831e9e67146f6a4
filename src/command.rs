use std::path::PathBuf;
use thiserror::Error;

const INPUT_OPERATOR: &str = "<";
const OUTPUT_OPERATOR: &str = ">";
pub const PIPE_OPERATOR: &str = "|";

/// Reasons a stage of the input line is rejected before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("multiple input redirections")]
    DuplicateInputRedirect,

    #[error("multiple output redirections")]
    DuplicateOutputRedirect,

    #[error("need a file name after {operator}")]
    MissingRedirectTarget { operator: &'static str },

    #[error("invalid file name {target} after {operator}")]
    InvalidRedirectTarget {
        operator: &'static str,
        target: String,
    },

    #[error("no command found")]
    EmptyCommand,
}

/// One validated segment of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Program followed by its arguments, never empty.
    pub arguments: Vec<String>,
    pub input_redirect: Option<PathBuf>,
    pub output_redirect: Option<PathBuf>,
    /// Reads from the previous stage's pipe.
    pub has_upstream: bool,
    /// Writes to the next stage's pipe.
    pub has_downstream: bool,
}

impl Stage {
    /// Validates the tokens of the stage at `index` out of `count` stages.
    ///
    /// `following` is the token right after this stage in the whole line,
    /// which is the `|` separator for every stage but the last. A redirection
    /// operator at the end of the stage takes it as its target and is
    /// rejected, just as an operator followed by another operator is.
    pub fn parse(
        tokens: &[&str],
        following: Option<&str>,
        index: usize,
        count: usize,
    ) -> Result<Self, ParseError> {
        let mut arguments = Vec::new();
        let mut input_redirect = None;
        let mut output_redirect = None;

        let mut i = 0;
        while i < tokens.len() {
            let operator = match tokens[i] {
                INPUT_OPERATOR => {
                    if input_redirect.is_some() {
                        return Err(ParseError::DuplicateInputRedirect);
                    }
                    INPUT_OPERATOR
                }
                OUTPUT_OPERATOR => {
                    if output_redirect.is_some() {
                        return Err(ParseError::DuplicateOutputRedirect);
                    }
                    OUTPUT_OPERATOR
                }
                token => {
                    arguments.push(token.to_string());
                    i += 1;
                    continue;
                }
            };

            let target = match tokens.get(i + 1).copied().or(following) {
                Some(target) => target,
                None => return Err(ParseError::MissingRedirectTarget { operator }),
            };
            if is_operator(target) {
                return Err(ParseError::InvalidRedirectTarget {
                    operator,
                    target: target.to_string(),
                });
            }

            let target = Some(PathBuf::from(target));
            if operator == INPUT_OPERATOR {
                input_redirect = target;
            } else {
                output_redirect = target;
            }
            i += 2;
        }

        if arguments.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        Ok(Stage {
            arguments,
            input_redirect,
            output_redirect,
            has_upstream: count > 1 && index > 0,
            has_downstream: count > 1 && index + 1 < count,
        })
    }

    pub fn program(&self) -> &str {
        &self.arguments[0]
    }

    /// The argument list as it appears in status reports.
    pub fn display_arguments(&self) -> String {
        self.arguments.join(" ")
    }
}

fn is_operator(token: &str) -> bool {
    matches!(token, INPUT_OPERATOR | OUTPUT_OPERATOR | PIPE_OPERATOR)
}
