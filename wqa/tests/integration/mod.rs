mod cli_tests;
mod config_tests;
mod lifecycle_tests;
