//! # Hangar Policy
//!
//! Attaches policies to running applications.
//!
//! ## Components
//!
//! - `PolicyPointcut` - Decides whether a policy applies to an event
//! - `PolicyParametrization` - One policy instance: id, pointcut, order, parameters
//! - `PolicyChain` - Applied policies in execution order
//! - `PolicyManager` - Atomic registration of policies for one application

pub mod chain;
pub mod manager;
pub mod parametrization;
pub mod pointcut;

pub use chain::{PolicyChain, PolicyEvent, PolicyHandler, ProcessingError, ProcessingResult};
pub use manager::{ParameterPolicyFactory, PolicyHandlerFactory, PolicyManager, PolicyTemplate};
pub use parametrization::PolicyParametrization;
pub use pointcut::{AlwaysPointcut, PathPointcut, PolicyPointcut};
