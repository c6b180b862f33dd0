//! Job lifecycle controller for batch workload managers.
//!
//! The engine turns a template job script plus a set of scheduler directives
//! into a submittable script, submits it through a [`SchedulerGateway`],
//! polls the scheduler until the job leaves the queue, and resubmits the same
//! script when the job terminates with anything other than `COMPLETED`.
//!
//! The pieces, leaf first:
//!
//! - [`directive`] formats `#SBATCH --key=value` lines.
//! - [`script`] strips and re-injects directives into a template.
//! - [`gateway`] is the only boundary to the external scheduler.
//! - [`controller`] drives the submit, poll, classify and retry loop.
//! - [`call`] synthesizes a script that invokes a single interpreter
//!   function and runs it through the controller.

pub mod call;
pub mod config;
pub mod controller;
pub mod directive;
mod error;
pub mod gateway;
pub mod script;

pub use call::FunctionCall;
pub use config::Config;
pub use controller::Controller;
pub use controller::LifecycleEvent;
pub use controller::LifecycleState;
pub use controller::Outcome;
pub use controller::RunRequest;
pub use directive::DirectiveSet;
pub use error::Error;
pub use error::Result;
pub use gateway::JobId;
pub use gateway::JobStatus;
pub use gateway::SchedulerGateway;
pub use gateway::slurm::SlurmGateway;
pub use script::ExtraArgs;
pub use script::ScriptTemplate;
pub use script::materialize;
