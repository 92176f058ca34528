//! Form extraction and field binding.
//!
//! Handlers declare the fields they want by index; the binder walks those
//! declarations in order and copies matching parts of the submitted form into
//! the handler. The first failure stops the walk.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use axum::body::Body;
use axum::http::{HeaderMap, Uri, header::CONTENT_TYPE};
use bytes::{Bytes, BytesMut};
use mc_protocol::Handler;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{DispatchError, FormError};

/// Uploaded file bytes held in memory per request. Larger uploads spill to
/// temporary files.
pub const MAX_FORM_MEMORY: usize = 32 * 1024 * 1024;

/// Extra room for non-file values on top of [`MAX_FORM_MEMORY`].
const VALUE_ALLOWANCE: usize = 10 * 1024 * 1024;

/// Content of one uploaded file.
#[derive(Debug)]
enum FormFile {
    Memory(Bytes),
    /// Anonymous temporary file, removed when dropped.
    Spooled(File),
}

/// Files and scalar values submitted with a request.
///
/// Scalar values come from the body first and the query string second; when a
/// name repeats, the first value wins. Only the first file per name is kept.
/// A part with an empty filename is a file input left blank and counts as a
/// value, not as a file.
#[derive(Debug, Default)]
pub struct FormData {
    files: HashMap<String, FormFile>,
    values: HashMap<String, Vec<String>>,
}

impl FormData {
    /// Parse a `multipart/form-data` or `application/x-www-form-urlencoded`
    /// body. Any other content type is rejected.
    pub async fn parse(headers: &HeaderMap, uri: &Uri, body: Body) -> Result<Self, FormError> {
        Self::parse_with_memory(headers, uri, body, MAX_FORM_MEMORY).await
    }

    async fn parse_with_memory(
        headers: &HeaderMap,
        uri: &Uri,
        body: Body,
        memory: usize,
    ) -> Result<Self, FormError> {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        let mut form = Self::default();
        match mime.as_str() {
            "multipart/form-data" => form.read_multipart(content_type, body, memory).await?,
            "application/x-www-form-urlencoded" => form.read_urlencoded(body).await?,
            _ => return Err(FormError::NotForm),
        }

        if let Some(query) = uri.query() {
            form.add_pairs(query.as_bytes());
        }

        debug!(
            files = form.files.len(),
            values = form.values.len(),
            "form parsed"
        );
        Ok(form)
    }

    /// Uploaded file content for `name`. Spooled files are read back from
    /// disk, so call this off the async runtime.
    pub fn file(&self, name: &str) -> Result<Option<Vec<u8>>, FormError> {
        match self.files.get(name) {
            None => Ok(None),
            Some(FormFile::Memory(data)) => Ok(Some(data.to_vec())),
            Some(FormFile::Spooled(file)) => {
                let mut reader: &File = file;
                let mut data = Vec::new();
                reader.seek(SeekFrom::Start(0)).map_err(FormError::Spool)?;
                reader.read_to_end(&mut data).map_err(FormError::Spool)?;
                Ok(Some(data))
            }
        }
    }

    /// First submitted value for `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    async fn read_multipart(
        &mut self,
        content_type: &str,
        body: Body,
        mut memory: usize,
    ) -> Result<(), FormError> {
        let boundary = multer::parse_boundary(content_type)?;
        let mut multipart = multer::Multipart::new(body.into_data_stream(), boundary);
        let mut value_budget = memory + VALUE_ALLOWANCE;

        while let Some(mut field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };

            if field.file_name().is_some_and(|f| !f.is_empty()) {
                let file = read_file(&mut field, &mut memory).await?;
                self.files.entry(name).or_insert(file);
            } else {
                let data = read_value(&mut field, &mut value_budget).await?;
                memory = memory.saturating_sub(data.len());
                self.values
                    .entry(name)
                    .or_default()
                    .push(String::from_utf8_lossy(&data).into_owned());
            }
        }
        Ok(())
    }

    async fn read_urlencoded(&mut self, body: Body) -> Result<(), FormError> {
        let bytes = axum::body::to_bytes(body, MAX_FORM_MEMORY)
            .await
            .map_err(FormError::Body)?;
        self.add_pairs(&bytes);
        Ok(())
    }

    fn add_pairs(&mut self, input: &[u8]) {
        for (key, value) in form_urlencoded::parse(input) {
            self.values
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }
}

/// Read a file part, keeping it in memory while `memory` allows.
async fn read_file(
    field: &mut multer::Field<'_>,
    memory: &mut usize,
) -> Result<FormFile, FormError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await? {
        if buffer.len() + chunk.len() > *memory {
            return spool_file(field, &buffer, &chunk).await;
        }
        buffer.extend_from_slice(&chunk);
    }
    *memory -= buffer.len();
    Ok(FormFile::Memory(buffer.freeze()))
}

async fn spool_file(
    field: &mut multer::Field<'_>,
    head: &[u8],
    chunk: &[u8],
) -> Result<FormFile, FormError> {
    let file = tempfile::tempfile().map_err(FormError::Spool)?;
    let mut file = tokio::fs::File::from_std(file);
    file.write_all(head).await.map_err(FormError::Spool)?;
    file.write_all(chunk).await.map_err(FormError::Spool)?;
    let mut size = head.len() + chunk.len();
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await.map_err(FormError::Spool)?;
        size += chunk.len();
    }
    file.flush().await.map_err(FormError::Spool)?;
    debug!(field = field.name().unwrap_or(""), bytes = size, "file part spooled to disk");
    Ok(FormFile::Spooled(file.into_std().await))
}

async fn read_value(field: &mut multer::Field<'_>, budget: &mut usize) -> Result<Bytes, FormError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await? {
        if buffer.len() + chunk.len() > *budget {
            return Err(FormError::TooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }
    *budget -= buffer.len();
    Ok(buffer.freeze())
}

/// Bind the first `field_count` declared fields of `handler` from `form`.
///
/// - file present: its bytes are bound
/// - file missing, optional: skipped
/// - file missing, mandatory: [`FormError::NoSuchFile`], binding stops
/// - scalar: bound only when the submitted value is non-empty
pub fn bind_fields(
    handler: &mut dyn Handler,
    form: &FormData,
    field_count: u32,
) -> Result<(), DispatchError> {
    for index in 0..field_count {
        let field = handler.field_descriptor(index)?;

        if field.is_file {
            match form.file(&field.name)? {
                Some(data) => handler.set_file_field(&field.name, data)?,
                None if !field.is_mandatory => {
                    debug!(field = %field.name, "optional file field not submitted");
                }
                None => return Err(FormError::NoSuchFile { field: field.name }.into()),
            }
        } else if let Some(value) = form.value(&field.name).filter(|v| !v.is_empty()) {
            handler.set_scalar_field(&field.name, value)?;
        }
    }
    Ok(())
}
