pub mod entity;
pub mod record;
pub mod relation;
