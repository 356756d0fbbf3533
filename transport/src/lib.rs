//! Transport rendezvous over named, directional pipes.
//!
//! Two independently started processes meet over a pair of Unix domain
//! sockets addressed by well-known names inside a rendezvous directory.
//! The names are fixed from the **server's** perspective: the server reads
//! requests from `input` and writes responses to `output`, so the client
//! writes to `input` and reads from `output`. Both processes must agree on
//! this inversion or frames land in a pipe nobody reads.
//!
//! The client side acts as the listener for both directions: it binds both
//! sockets, spawns the server as a child process, and waits (cancellably,
//! with a bounded timeout) for the server to connect to each. The server
//! side connects to both names, retrying briefly until the listener is up.

mod error;
mod rendezvous;

pub use error::TransportError;
pub use rendezvous::{Connection, LaunchCommand, Listening, PipePair, bind, connect, launch};
