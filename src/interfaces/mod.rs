//! Inbound adapters. The HTTP surface is the only one; it translates
//! requests into engine operations and errors into status codes.

pub mod http;
