//! Document storage in the default NVS partition
//!
//! Documents are stored as blobs rather than NVS strings: a full token set
//! is larger than the NVS string size limit.

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use crate::store::DocumentStore;

const NAMESPACE: &str = "presence";

pub struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStore {
    pub fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, NAMESPACE, true)?,
        })
    }
}

impl DocumentStore for NvsStore {
    fn load(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        let Some(len) = self.nvs.blob_len(key)? else {
            return Ok(None);
        };
        let mut buf = vec![0u8; len];
        match self.nvs.get_blob(key, &mut buf)? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes.to_vec())?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, key: &str, document: &str) -> anyhow::Result<()> {
        self.nvs.set_blob(key, document.as_bytes())?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.nvs.remove(key)?;
        Ok(())
    }
}
