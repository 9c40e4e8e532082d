pub mod actor;
pub mod policy;
pub mod roles;

pub use actor::Actor;
pub use policy::{authorize, required_access, Access, Action, Decision, Relationship};
pub use roles::Role;
