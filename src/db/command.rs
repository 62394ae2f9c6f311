//! Commands submitted to a connection scope.

use super::Value;

/// How the command text is interpreted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// Ad hoc SQL text.
    #[default]
    Text,
    /// Name of a stored procedure (or set-returning function) to invoke with the parameters.
    StoredProcedure,
}

/// SQL text or procedure name plus ordered, positional parameters.
///
/// Parameter types are not checked here; the driver rejects values it cannot bind.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub kind: CommandKind,
    pub params: Vec<Value>,
}

impl Command {
    /// Creates an ad hoc SQL command.
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            text: sql.into(),
            kind: CommandKind::Text,
            params: Vec::new(),
        }
    }

    /// Creates a stored-procedure command.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            kind: CommandKind::StoredProcedure,
            params: Vec::new(),
        }
    }

    /// Appends a positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Renders the statement with numbered placeholders for the parameters.
    ///
    /// `placeholder` receives the one-based parameter index.
    pub(crate) fn render(&self, placeholder: impl Fn(usize) -> String) -> String {
        match self.kind {
            CommandKind::Text => self.text.clone(),
            CommandKind::StoredProcedure => format!("SELECT * FROM {}", self.invocation(placeholder)),
        }
    }

    /// Like [`render`](Self::render), invoking a procedure with `CALL`.
    pub(crate) fn render_call(&self, placeholder: impl Fn(usize) -> String) -> String {
        match self.kind {
            CommandKind::Text => self.text.clone(),
            CommandKind::StoredProcedure => format!("CALL {}", self.invocation(placeholder)),
        }
    }

    fn invocation(&self, placeholder: impl Fn(usize) -> String) -> String {
        let args: Vec<String> = (1..=self.params.len()).map(placeholder).collect();
        format!("{}({})", self.text, args.join(", "))
    }
}
