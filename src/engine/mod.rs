//! Headless form engine: field schema, tagged values, widget dispatch,
//! validation, multipart serialization and the submit lifecycle.

pub mod dispatcher;
pub mod orchestrator;
pub mod schema;
pub mod serializer;
pub mod validation;
pub mod value;
