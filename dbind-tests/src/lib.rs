//! Integration tests for dbind live under `tests/`.
