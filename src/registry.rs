//! Name to handler dispatch table.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::Error;

/// A registered function: takes the request's `args`, returns the value
/// sent back to the caller.
pub type Handler = Box<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Default)]
pub(crate) struct Registry {
    functions: HashMap<String, Handler>,
    fallback: Option<Handler>,
}

impl Registry {
    /// Binds `name` to `handler`. An existing binding wins and stays.
    pub(crate) fn bind(&mut self, name: &str, handler: Handler) -> Result<(), Error> {
        if self.functions.contains_key(name) {
            return Err(Error::Collision);
        }
        self.functions.insert(name.to_owned(), handler);
        Ok(())
    }

    /// Installs the catch-all for names with no binding of their own.
    pub(crate) fn set_fallback(&mut self, handler: Handler) {
        self.fallback = Some(handler);
    }

    /// Runs the handler bound to `name`, or the fallback. `None` when
    /// neither exists; the caller owes no reply then.
    pub(crate) fn dispatch(&self, name: &str, args: &Value) -> Option<Value> {
        match self.functions.get(name) {
            Some(handler) => Some(handler(args)),
            None => self.fallback.as_ref().map(|handler| handler(args)),
        }
    }
}
