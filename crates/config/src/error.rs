// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

use miette::Diagnostic;

/// Errors that can occur while loading or validating a worker configuration.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// An error that occurred while reading a configuration file.
    #[error("File read error: {details}")]
    #[diagnostic(code(spate_config::file_read_error), url(docsrs))]
    FileReadError {
        /// The path of the file that could not be read.
        path: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while deserializing a configuration document.
    #[error("YAML deserialization error: {details}")]
    #[diagnostic(code(spate_config::deserialization_error), url(docsrs))]
    DeserializationError {
        /// A description of the error that occurred.
        details: String,
    },

    /// The configuration was parsed but violates a constraint.
    #[error("Invalid configuration: {error}")]
    #[diagnostic(code(spate_config::invalid_configuration), url(docsrs))]
    InvalidUserConfig {
        /// The constraint that was violated.
        error: String,
    },
}
