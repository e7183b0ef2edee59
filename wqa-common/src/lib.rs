//! Core of the Weka-on-Azure QA harness.
//!
//! A [`DeploymentController`] renders terraform configuration, applies it
//! through a [`CommandRunner`], fetches the status function key from a
//! [`CloudClient`], polls a [`StatusSource`] until the cluster converges
//! and always tears everything down again. [`scenario`] validators run
//! between convergence and teardown.

pub mod cloud;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod logging;
pub mod mock;
pub mod outputs;
pub mod runner;
pub mod scenario;
pub mod status;
pub mod util;

pub use cloud::{CloudClient, CloudCredentials, CloudProvider};
pub use config::HarnessConfig;
pub use deploy::{
    CleanupReport, Collaborators, Deployment, DeploymentController, DeploymentParameters,
    DeploymentSettings, DeploymentState, ExpectedState, WaitOutcome, WaitPolicy,
};
pub use errors::{HarnessError, HarnessResult};
pub use runner::{CommandRunner, ExecutionResult, Invocation, LocalRunner};
pub use scenario::{Scenario, ScenarioFailure, ScenarioReport, run_scenario};
pub use status::{ClusterStatusSnapshot, ProtectionScheme, StatusClient, StatusSource};
