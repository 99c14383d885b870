//! Test-only mock backend (§1.1 "Test tooling"), grounded on the teacher's `render-test` crate's
//! type-alias fixture pattern: a concrete, deliberately simple [`Backend`] implementation so the
//! rest of the crate can be exercised without a real GPU.

#![cfg(test)]

use crate::gpu::{
    Backend, BackendError, Buffer, DeviceLimits, Format, FormatCaps, Pass, Texture, TextureUsage, Timer,
};
use std::cell::Cell;
use std::fmt;

#[derive(Debug)]
pub struct MockTexture {
    width: u32,
    height: u32,
    format: Format,
}

impl Texture for MockTexture {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn format(&self) -> Format {
        self.format
    }
}

#[derive(Debug)]
pub struct MockBuffer {
    size: u64,
}

impl Buffer for MockBuffer {
    fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug)]
pub struct MockPass;
impl Pass for MockPass {}

#[derive(Debug)]
pub struct MockTimer;
impl Timer for MockTimer {}

/// A backend that always succeeds and never touches real GPU state. `fail_next_pass` lets tests
/// exercise the degradation-latch path by forcing exactly one `create_pass` failure.
pub struct MockBackend {
    limits: DeviceLimits,
    pub fail_next_pass: Cell<bool>,
    compiled_pass_count: Cell<u32>,
    create_pass_from_binary_count: Cell<u32>,
    push_constant_upload_count: Cell<u32>,
    global_uniform_update_count: Cell<u32>,
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend").finish()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend {
            limits: DeviceLimits::default(),
            fail_next_pass: Cell::new(false),
            compiled_pass_count: Cell::new(0),
            create_pass_from_binary_count: Cell::new(0),
            push_constant_upload_count: Cell::new(0),
            global_uniform_update_count: Cell::new(0),
        }
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        MockBackend {
            limits,
            fail_next_pass: Cell::new(false),
            compiled_pass_count: Cell::new(0),
            create_pass_from_binary_count: Cell::new(0),
            push_constant_upload_count: Cell::new(0),
            global_uniform_update_count: Cell::new(0),
        }
    }

    pub fn compiled_pass_count(&self) -> u32 {
        self.compiled_pass_count.get()
    }

    pub fn create_pass_from_binary_count(&self) -> u32 {
        self.create_pass_from_binary_count.get()
    }

    pub fn push_constant_upload_count(&self) -> u32 {
        self.push_constant_upload_count.get()
    }

    pub fn global_uniform_update_count(&self) -> u32 {
        self.global_uniform_update_count.get()
    }
}

impl Backend for MockBackend {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn format_caps(&self, format: Format) -> FormatCaps {
        let mut caps = FormatCaps::SAMPLEABLE | FormatCaps::RENDERABLE | FormatCaps::BLITTABLE | FormatCaps::BLENDABLE;
        if format.supports_storage() {
            caps |= FormatCaps::STORABLE;
        }
        if format.is_unorm() {
            caps |= FormatCaps::LINEAR_SAMPLING;
        }
        caps
    }

    fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: Format,
        _usage: TextureUsage,
    ) -> Result<Box<dyn Texture>, BackendError> {
        Ok(Box::new(MockTexture { width, height, format }))
    }

    fn destroy_texture(&self, _texture: Box<dyn Texture>) {}

    fn upload_texture(&self, _texture: &dyn Texture, _data: &[u8]) {}

    fn clear_texture(&self, _texture: &dyn Texture, _color: [f32; 4]) {}

    fn create_buffer(&self, size: u64) -> Result<Box<dyn Buffer>, BackendError> {
        Ok(Box::new(MockBuffer { size }))
    }

    fn destroy_buffer(&self, _buffer: Box<dyn Buffer>) {}

    fn write_buffer(&self, _buffer: &dyn Buffer, _offset: u64, _data: &[u8]) {}

    fn create_pass(
        &self,
        _source: &str,
        _target_format: Option<Format>,
        _is_compute: bool,
    ) -> Result<Box<dyn Pass>, BackendError> {
        if self.fail_next_pass.replace(false) {
            return Err(BackendError::CompileFailed("forced test failure".into()));
        }
        self.compiled_pass_count.set(self.compiled_pass_count.get() + 1);
        Ok(Box::new(MockPass))
    }

    fn destroy_pass(&self, _pass: Box<dyn Pass>) {}

    fn run_pass(&self, _pass: &dyn Pass, _target: Option<&dyn Texture>) {}

    fn program_binary(&self, _pass: &dyn Pass) -> Option<Vec<u8>> {
        Some(b"MOCKBIN".to_vec())
    }

    fn create_pass_from_binary(
        &self,
        _binary: &[u8],
        _target_format: Option<Format>,
        _is_compute: bool,
    ) -> Result<Box<dyn Pass>, BackendError> {
        self.create_pass_from_binary_count
            .set(self.create_pass_from_binary_count.get() + 1);
        Ok(Box::new(MockPass))
    }

    fn upload_push_constants(&self, _pass: &dyn Pass, _bytes: &[u8]) {
        self.push_constant_upload_count
            .set(self.push_constant_upload_count.get() + 1);
    }

    fn update_global_uniform(&self, _pass: &dyn Pass, _index: usize, _bytes: &[u8]) {
        self.global_uniform_update_count
            .set(self.global_uniform_update_count.get() + 1);
    }

    fn create_timer(&self) -> Box<dyn Timer> {
        Box::new(MockTimer)
    }

    fn destroy_timer(&self, _timer: Box<dyn Timer>) {}

    fn flush(&self) {}
    fn finish(&self) {}
    fn is_failed(&self) -> bool {
        false
    }
}
