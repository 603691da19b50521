pub(crate) mod redact;
pub(crate) mod retry;
