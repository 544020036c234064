//! End-to-end tests driving a real in-process server over loopback TCP.


pub mod support;
