pub mod fetch;
pub mod global_variables;
pub mod http;
pub mod ign;
