pub mod broker_credential;
