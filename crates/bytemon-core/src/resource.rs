//! Opaque resource tags.
//!
//! A monitor does not care what it counts; the tag only shows up in error
//! messages and log lines.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Resource(&'static str);

impl Resource {
    pub const MEMORY: Resource = Resource("memory");
    pub const DISK: Resource = Resource("disk");

    pub const fn new(tag: &'static str) -> Self {
        Self(tag)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}
