use crate::service::{DescriptorError, MAX_SECRET_LEN, MAX_TEXT_LEN, Secret, ServiceDescriptor};
use crate::storage::{KvError, KvStore};
use thiserror::Error;

pub const DEFAULT_CAPACITY: usize = 20;

const KEY_COUNT: &str = "svc_count";
const KEY_PREFIX: &str = "svc_";

// service_name | account | secret | issuer | digits u8 | period u32 LE
const RECORD_LEN: usize = MAX_TEXT_LEN * 3 + MAX_SECRET_LEN + 1 + 4;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is full ({capacity} services)")]
    Full { capacity: usize },
    #[error("index {index} out of range ({count} services stored)")]
    OutOfRange { index: usize, count: usize },
    #[error("stored value under {key} is corrupt")]
    Corrupt { key: String },
    #[error("persistence failed: {0}")]
    Persist(#[from] KvError),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
enum RecordError {
    #[error("record is {0} bytes long")]
    Length(usize),
    #[error("text field is not utf-8")]
    Utf8,
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

fn entry_key(index: usize) -> String {
    format!("{KEY_PREFIX}{index}")
}

fn put_field(out: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = &text.as_bytes()[..text.len().min(width)];
    out.extend_from_slice(bytes);
    out.resize(out.len() + width - bytes.len(), 0);
}

fn take_field<'a>(data: &mut &'a [u8], width: usize) -> Result<&'a str, RecordError> {
    let (field, rest) = data.split_at(width);
    *data = rest;
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    std::str::from_utf8(&field[..end]).map_err(|_| RecordError::Utf8)
}

fn encode_record(service: &ServiceDescriptor) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_LEN);
    put_field(&mut out, service.service_name(), MAX_TEXT_LEN);
    put_field(&mut out, service.account(), MAX_TEXT_LEN);
    put_field(&mut out, service.secret().as_str(), MAX_SECRET_LEN);
    put_field(&mut out, service.issuer(), MAX_TEXT_LEN);
    out.push(service.digits());
    out.extend_from_slice(&service.period().to_le_bytes());
    out
}

fn decode_record(data: &[u8]) -> Result<ServiceDescriptor, RecordError> {
    if data.len() != RECORD_LEN {
        return Err(RecordError::Length(data.len()));
    }
    let mut cursor = data;
    let service_name = take_field(&mut cursor, MAX_TEXT_LEN)?;
    let account = take_field(&mut cursor, MAX_TEXT_LEN)?;
    let secret = take_field(&mut cursor, MAX_SECRET_LEN)?;
    let issuer = take_field(&mut cursor, MAX_TEXT_LEN)?;
    let digits = cursor[0];
    let period = u32::from_le_bytes([cursor[1], cursor[2], cursor[3], cursor[4]]);

    let secret = Secret::new(secret).map_err(DescriptorError::from)?;
    Ok(ServiceDescriptor::new(
        service_name,
        account,
        issuer,
        secret,
        digits,
        period,
    )?)
}

/// Bounded, positionally indexed list of services mirrored to a
/// key/value backend.
///
/// Every mutation writes the whole list back before returning. Entry
/// records go first and the count key last. A torn write leaves the
/// previous count pointing at complete records, though they may match
/// neither the old list nor the new one.
pub struct CredentialStore {
    kv: Box<dyn KvStore>,
    services: Vec<ServiceDescriptor>,
    capacity: usize,
}

impl CredentialStore {
    /// Load whatever the backend holds. A missing count key means an
    /// empty store.
    pub fn open(kv: Box<dyn KvStore>, capacity: usize) -> Result<Self, StoreError> {
        let mut count = match kv.load(KEY_COUNT)? {
            None => {
                log::info!("no services stored, starting fresh");
                0
            }
            Some(raw) => {
                let raw: [u8; 4] = raw.as_slice().try_into().map_err(|_| StoreError::Corrupt {
                    key: KEY_COUNT.to_string(),
                })?;
                u32::from_le_bytes(raw) as usize
            }
        };

        if count > capacity {
            log::warn!("service count {count} exceeds capacity {capacity}, truncating");
            count = capacity;
        }

        let mut services = Vec::with_capacity(capacity);
        for index in 0..count {
            let key = entry_key(index);
            match kv.load(&key)? {
                Some(raw) => match decode_record(&raw) {
                    Ok(service) => {
                        log::debug!("loaded {key}: {} ({})", service.issuer(), service.account());
                        services.push(service);
                    }
                    Err(e) => log::error!("skipping {key}: {e}"),
                },
                None => log::error!("skipping {key}: record missing"),
            }
        }

        log::info!("loaded {} services", services.len());
        Ok(Self {
            kv,
            services,
            capacity,
        })
    }

    fn persist(kv: &mut dyn KvStore, services: &[ServiceDescriptor]) -> Result<(), KvError> {
        for (index, service) in services.iter().enumerate() {
            kv.save(&entry_key(index), &encode_record(service))?;
        }
        kv.save(KEY_COUNT, &(services.len() as u32).to_le_bytes())
    }

    /// Append a service and return its index. On a failed write the list
    /// is left exactly as it was.
    pub fn add(&mut self, service: ServiceDescriptor) -> Result<usize, StoreError> {
        if self.services.len() >= self.capacity {
            log::error!("store is full ({} services)", self.capacity);
            return Err(StoreError::Full {
                capacity: self.capacity,
            });
        }

        self.services.push(service);
        if let Err(e) = Self::persist(self.kv.as_mut(), &self.services) {
            self.services.pop();
            log::error!("failed to save services after add: {e}");
            return Err(e.into());
        }

        let index = self.services.len() - 1;
        let added = &self.services[index];
        log::info!(
            "added service {}: {} ({}), total {}",
            index,
            added.issuer(),
            added.account(),
            self.services.len()
        );
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Result<&ServiceDescriptor, StoreError> {
        self.services.get(index).ok_or(StoreError::OutOfRange {
            index,
            count: self.services.len(),
        })
    }

    /// Remove the service at `index`; later entries move down by one.
    ///
    /// If the write fails the removal still stands in memory and the
    /// error is returned.
    pub fn delete(&mut self, index: usize) -> Result<ServiceDescriptor, StoreError> {
        if index >= self.services.len() {
            return Err(StoreError::OutOfRange {
                index,
                count: self.services.len(),
            });
        }

        let removed = self.services.remove(index);
        log::info!(
            "deleting service {index}: {} ({})",
            removed.issuer(),
            removed.account()
        );

        if let Err(e) = Self::persist(self.kv.as_mut(), &self.services) {
            log::error!("failed to save services after delete: {e}");
            return Err(e.into());
        }

        let stale = entry_key(self.services.len());
        if let Err(e) = self.kv.remove(&stale) {
            log::warn!("could not remove stale {stale}: {e}");
        }

        log::info!("service deleted, {} remaining", self.services.len());
        Ok(removed)
    }

    pub fn count(&self) -> usize {
        self.services.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter()
    }

    /// All services, secrets included, as a JSON array.
    pub fn list_as_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(&self.services)?)
    }

    /// Drop every service. Memory is cleared even if the write fails.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        let old_count = self.services.len();
        self.services.clear();
        log::info!("clearing {old_count} services");

        if let Err(e) = self.kv.save(KEY_COUNT, &0u32.to_le_bytes()) {
            log::error!("failed to save cleared count: {e}");
            return Err(e.into());
        }

        for index in 0..old_count {
            let key = entry_key(index);
            if let Err(e) = self.kv.remove(&key) {
                log::warn!("could not remove {key}: {e}");
            }
        }
        Ok(())
    }
}
