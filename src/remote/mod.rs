mod ssh;

pub use ssh::{fetch_document, RemoteTransport, SshTransport};
