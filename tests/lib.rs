//! Shared support for the Mote integration tests.
