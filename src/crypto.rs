// SPDX-License-Identifier: Apache-2.0

use rustls::crypto::CryptoProvider;
use tower::BoxError;

/// Installs the process-wide rustls provider unless one is already set.
pub fn init_crypto_provider() -> Result<(), BoxError> {
    if CryptoProvider::get_default().is_none() {
        return match rustls::crypto::aws_lc_rs::default_provider().install_default() {
            Ok(_) => Ok(()),
            // lost a race with another initializer
            Err(_) if CryptoProvider::get_default().is_some() => Ok(()),
            Err(e) => Err(format!("failed to initialize crypto library: {:?}", e).into()),
        };
    }
    Ok(())
}
