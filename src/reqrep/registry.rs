use std::collections::hash_map::Entry;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::reqrep::error::ReqrepError;
use crate::reqrep::handler::RequestHandler;

/// Maps protocol tags to request handlers. There is at most one handler per tag, and only the
///  handler that is bound can unbind itself.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: FxHashMap<String, Arc<dyn RequestHandler>>,
}

impl HandlerRegistry {
    pub fn bind(&mut self, tag: &str, handler: Arc<dyn RequestHandler>) -> Result<(), ReqrepError> {
        match self.handlers.entry(tag.to_string()) {
            Entry::Occupied(_) => Err(ReqrepError::AlreadyBound(tag.to_string())),
            Entry::Vacant(e) => {
                e.insert(handler);
                Ok(())
            }
        }
    }

    pub fn unbind(&mut self, tag: &str, handler: &Arc<dyn RequestHandler>) -> Result<(), ReqrepError> {
        match self.handlers.get(tag) {
            Some(bound) if is_same_handler(bound, handler) => {
                self.handlers.remove(tag);
                Ok(())
            }
            _ => Err(ReqrepError::NotBound(tag.to_string())),
        }
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.get(tag).cloned()
    }
}

/// identity rather than equality - comparing the data pointers only, since vtable pointers for
///  the same type are not guaranteed to be unique
fn is_same_handler(a: &Arc<dyn RequestHandler>, b: &Arc<dyn RequestHandler>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
