//! Site provisioning: nginx vhosts, PHP-FPM pools and the orchestrator

pub mod php_fpm;
pub mod provisioner;
pub mod templates;
pub mod vhost;
