//! Command construction
//!
//! A command is an argument list sent to the server as a RESP array of bulk
//! strings. `Command` owns the arguments as `Bytes` so binary-safe payloads
//! work without copies at send time.

use bytes::{Bytes, BytesMut};

/// A single Redis command ready for pipelining
#[derive(Debug, Clone)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Start a command with the given name, e.g. `Command::new("GET")`
    pub fn new(name: impl AsRef<[u8]>) -> Self {
        Self {
            args: vec![Bytes::copy_from_slice(name.as_ref())],
        }
    }

    /// Build a command from a complete argument list
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Self {
            args: args
                .into_iter()
                .map(|a| Bytes::copy_from_slice(a.as_ref()))
                .collect(),
        }
    }

    /// Append an argument
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// The argument list, command name first
    #[must_use]
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Encode this command onto the wire buffer
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        crate::protocol::encode_command(&self.args, buf);
    }
}
