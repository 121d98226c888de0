//! Resource kind shared by unit tests.

use crate::resource::{ObjectMeta, Resource};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Widget {
    pub metadata: ObjectMeta,
    pub size: u32,
    pub status: Option<String>,
}

impl Widget {
    pub fn new(name: &str, size: u32) -> Self {
        Self {
            metadata: ObjectMeta::new("default", name),
            size,
            status: None,
        }
    }
}

impl Resource for Widget {
    const KIND: &'static str = "Widget";
    type Status = String;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> Option<&String> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: String) {
        self.status = Some(status);
    }
}
