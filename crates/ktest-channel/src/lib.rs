//! Command execution and file transfer over a local process, an SSH
//! session, or a hypervisor guest's serial console.

pub mod channel;
pub mod command_prompt;
pub mod file_transport;
pub mod process_channel;
pub mod serial_channel;
pub mod ssh_channel;

pub use channel::{Channel, ChannelState};
pub use command_prompt::{CommandPrompt, SIGTERM_RETURNCODE};
pub use file_transport::FileTransport;
pub use process_channel::ProcessChannel;
pub use serial_channel::SerialChannel;
pub use ssh_channel::{SshAuth, SshChannel};
