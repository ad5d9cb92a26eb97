//! External collaborators consumed by the runner.
//!
//! The runner only talks to tools, containers, HTTP endpoints, analysis
//! servers and mail through these traits, so it can be exercised without
//! invoking real scanners.

mod analysis;
mod checkout;
mod container;
mod executor;
mod mail;
mod probe;

pub use analysis::{parse_sonar_status, AnalysisSource, AnalysisStatus};
#[cfg(feature = "http")]
pub use analysis::SonarQubeSource;
pub use checkout::{CheckoutProvider, LocalCheckout};
pub use container::{ContainerHandle, ContainerRuntime, DockerCli, ImageRef, PortMapping};
pub use executor::{CommandExecutor, CommandOutput, CommandSpec, ProcessExecutor};
pub use mail::{LoggingMailTransport, MailMessage, MailTransport, OutboxMailTransport};
#[cfg(test)]
pub use probe::MockHttpProbe;
pub use probe::{is_ready_status, HttpProbe};
#[cfg(feature = "http")]
pub use probe::ReqwestProbe;
