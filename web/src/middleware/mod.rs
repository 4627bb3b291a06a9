pub(crate) mod publish_auth;
