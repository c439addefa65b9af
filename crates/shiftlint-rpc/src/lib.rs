//! Framed RPC transport for remote providers: length-prefixed JSON frames
//! over TCP, Unix sockets, or a child's stdio, with optional TLS and
//! bearer-token auth.

// Wire format
pub mod frame;

// Bearer tokens
pub mod auth;

// Endpoints and connection plumbing
pub mod transport;

// Engine-side client
pub mod client;

// Provider-side server
pub mod server;

// Client
pub use client::{ClientOptions, RemoteProvider};

// Server
pub use server::{ProviderServer, ServerOptions, TlsServerConfig};

// Transport
pub use transport::{Connection, Endpoint, dial};

// Auth
pub use auth::{Claims, JWT_SECRET_ENV, issue, resolve_secret, verify};
