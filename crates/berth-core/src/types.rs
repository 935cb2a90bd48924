//! Shared types used across Berth crates.

use serde::{Deserialize, Serialize};

/// The provisioner's view of an application.
///
/// The application record itself is owned by the layer above; the
/// provisioner only needs its name and the platform its image is built on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub platform: String,
}

impl App {
    pub fn new(name: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_new_sets_fields() {
        let app = App::new("myapp", "python");
        assert_eq!(app.name, "myapp");
        assert_eq!(app.platform, "python");
    }
}
