//! System-under-test lifecycles: a local machine, an SSH host, or a
//! hypervisor guest reached over its serial console.

pub mod hypervisor;
pub mod local;
pub mod ssh;
pub mod sut;

pub use hypervisor::{compose_qemu_command, HypervisorSut, QemuOptions};
pub use local::LocalSut;
pub use ssh::SshSut;
pub use sut::Sut;
