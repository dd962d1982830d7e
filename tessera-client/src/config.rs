use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_core::{EncryptionConfig, PipelineConfig, Result, TesseraError, TlsConfig};
use tessera_meta::KvBuilder;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub namespace: String,
    /// Namespace password on the data shards.
    #[serde(default)]
    pub password: Option<String>,
    pub datastor: DataStorConfig,
    #[serde(default)]
    pub metastor: MetaStorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataStorConfig {
    pub shards: Vec<String>,
    /// Shard namespace, the top-level namespace when absent.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaStorConfig {
    #[serde(default)]
    pub db: MetaStorDbConfig,
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

impl Default for MetaStorConfig {
    fn default() -> Self {
        Self {
            db: MetaStorDbConfig::default(),
            encryption: None,
            encoding: default_encoding(),
        }
    }
}

fn default_encoding() -> String {
    tessera_meta::encoding::DEFAULT_ENCODING.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaStorDbConfig {
    #[serde(rename = "type", default)]
    pub db_type: MetaStorDbType,
    #[serde(default)]
    pub config: MetaStorDbSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaStorDbType {
    Badger,
    Embedded,
    Etcd,
    #[default]
    Memory,
}

impl MetaStorDbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaStorDbType::Badger => "badger",
            MetaStorDbType::Embedded => "embedded",
            MetaStorDbType::Etcd => "etcd",
            MetaStorDbType::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaStorDbSettings {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("TESSERA").separator("__"))
            .build()
            .map_err(|e| TesseraError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| TesseraError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(TesseraError::Config("namespace cannot be empty".to_string()));
        }

        let shards = self
            .datastor
            .shards
            .iter()
            .filter(|shard| !shard.trim().is_empty())
            .count();
        if shards == 0 {
            return Err(TesseraError::Config(
                "at least one datastor shard is required".to_string(),
            ));
        }

        let distribution = &self.pipeline.distribution;
        if distribution.data_shards == 0 && distribution.parity_shards > 0 {
            return Err(TesseraError::Config(format!(
                "parity shards ({}) configured without data shards",
                distribution.parity_shards
            )));
        }
        if distribution.required_shard_count() > shards {
            return Err(TesseraError::Config(format!(
                "distribution requires {} shards, only {} configured",
                distribution.required_shard_count(),
                shards
            )));
        }
        Ok(())
    }

    /// Namespace used on the data shards.
    pub fn shard_namespace(&self) -> &str {
        self.datastor
            .namespace
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(&self.namespace)
    }

    pub fn kv_builder(&self) -> KvBuilder {
        let db = &self.metastor.db;
        let mut builder = KvBuilder::new().backend(db.db_type.as_str());
        if let Some(path) = &db.config.path {
            builder = builder.path(path.clone());
        }
        if !db.config.endpoints.is_empty() {
            builder = builder.etcd_endpoints(db.config.endpoints.clone());
        }
        if let Some(secs) = db.config.timeout_secs {
            builder = builder.etcd_timeout(Duration::from_secs(secs));
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tessera_core::{CompressionType, HashType};

    fn write_temp(extension: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_yaml_file() {
        let file = write_temp(
            ".yaml",
            r#"
namespace: thedisk
password: secret
datastor:
  shards:
    - 127.0.0.1:12345
    - 127.0.0.1:12346
    - 127.0.0.1:12347
  tls:
    enabled: true
    server_name: zdb.local
metastor:
  db:
    type: etcd
    config:
      endpoints:
        - 127.0.0.1:2379
      timeout_secs: 10
  encryption:
    type: aes
    private_key: ab345678901234567890123456789012
pipeline:
  block_size: 4096
  hashing:
    type: blake2b_256
  compression:
    type: lz4
    mode: default
  distribution:
    data_shards: 2
    parity_shards: 1
"#,
        );
        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.namespace, "thedisk");
        assert_eq!(config.shard_namespace(), "thedisk");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.datastor.shards.len(), 3);
        assert!(config.datastor.tls.as_ref().unwrap().enabled);
        assert_eq!(config.metastor.db.db_type, MetaStorDbType::Etcd);
        assert_eq!(config.metastor.db.config.timeout_secs, Some(10));
        assert_eq!(config.metastor.encoding, "protobuf");
        assert!(config.metastor.encryption.is_some());
        assert_eq!(config.pipeline.block_size, 4096);
        assert_eq!(config.pipeline.hashing.hash_type, HashType::Blake2b256);
        assert_eq!(
            config.pipeline.compression.as_ref().unwrap().compression_type,
            CompressionType::Lz4
        );
        assert_eq!(config.pipeline.distribution.required_shard_count(), 3);
    }

    #[test]
    fn test_from_json_file_with_defaults() {
        let file = write_temp(
            ".json",
            r#"{"namespace": "ns", "datastor": {"shards": ["a:1"], "namespace": "data"}}"#,
        );
        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.shard_namespace(), "data");
        assert_eq!(config.metastor.db.db_type, MetaStorDbType::Memory);
        assert!(config.pipeline.distribution.is_random());
        assert_eq!(config.pipeline.block_size, 0);
    }

    fn base_config() -> Config {
        Config {
            namespace: "ns".to_string(),
            password: None,
            datastor: DataStorConfig {
                shards: vec!["a:1".to_string(), "b:1".to_string()],
                ..Default::default()
            },
            metastor: MetaStorConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    #[test]
    fn test_validate() {
        assert!(base_config().validate().is_ok());

        let mut config = base_config();
        config.namespace = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.datastor.shards.clear();
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.pipeline.distribution.parity_shards = 1;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.pipeline.distribution.data_shards = 2;
        config.pipeline.distribution.parity_shards = 1;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.pipeline.distribution.data_shards = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file("/nonexistent/tessera.yaml"),
            Err(TesseraError::Config(_))
        ));
    }
}
