//! 证书与私钥的加载：PEM 文件或现场生成的自签名证书。

use std::path::Path;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::settings::SettingsError;

/// 一组可用于构建 `TlsConfig` 的证书链与私钥。
#[derive(Debug)]
pub struct KeyMaterial {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl KeyMaterial {
    /// 叶证书；自测客户端把它当作信任锚。
    pub fn leaf(&self) -> Option<&CertificateDer<'static>> {
        self.chain.first()
    }
}

impl Clone for KeyMaterial {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

pub fn load_certificate_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, SettingsError> {
    let pem_error = |source| SettingsError::Pem {
        path: path.to_path_buf(),
        source,
    };
    let chain = CertificateDer::pem_file_iter(path)
        .map_err(pem_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(pem_error)?;
    if chain.is_empty() {
        return Err(SettingsError::EmptyChain {
            path: path.to_path_buf(),
        });
    }
    Ok(chain)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, SettingsError> {
    PrivateKeyDer::from_pem_file(path).map_err(|source| SettingsError::Pem {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load(cert: &Path, key: &Path) -> Result<KeyMaterial, SettingsError> {
    Ok(KeyMaterial {
        chain: load_certificate_chain(cert)?,
        key: load_private_key(key)?,
    })
}

/// 为给定主机名生成自签名证书，仅用于演示与测试。
pub fn self_signed(names: &[String]) -> Result<KeyMaterial, SettingsError> {
    let certified = rcgen::generate_simple_self_signed(names.to_vec())?;
    Ok(KeyMaterial {
        chain: vec![certified.cert.der().clone()],
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        )),
    })
}
