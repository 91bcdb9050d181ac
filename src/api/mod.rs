// src/api/mod.rs
// HTTP/SSE front door (A3, §6 "Concretely for this crate"). Auth is a stub
// per §1's scoping of "HTTP/SSE front door and auth" as a thin external
// collaborator — the crate still hosts the SSE endpoint itself.

pub mod http;
