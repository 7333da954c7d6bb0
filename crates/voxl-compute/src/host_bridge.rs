//! Default converters between [`HostArray`], [`Buffer`] and [`Image`].
//!
//! Every converter keeps dimensions, element type and values exactly.
//! Device memory remembers the channel and frame structure of the host array
//! uploaded into it and passes it on through device copies, so arrays come
//! back with the structure they went in with.

use voxl_core::HostArray;

use crate::context::ComputeContext;
use crate::convert::{ConversionRegistry, TypeTag, Value};
use crate::memory::{Buffer, Image};
use crate::{ComputeError, ComputeResult};

/// Register all six converters on `registry`.
pub fn register(registry: &mut ConversionRegistry) {
    registry.register(TypeTag::Host, TypeTag::Buffer, host_to_buffer);
    registry.register(TypeTag::Buffer, TypeTag::Host, buffer_to_host);
    registry.register(TypeTag::Host, TypeTag::Image, host_to_image);
    registry.register(TypeTag::Image, TypeTag::Host, image_to_host);
    registry.register(TypeTag::Buffer, TypeTag::Image, buffer_to_image);
    registry.register(TypeTag::Image, TypeTag::Buffer, image_to_buffer);
}

fn unexpected(expected: TypeTag, value: &Value) -> ComputeError {
    ComputeError::OperationFailed(format!("expected {expected}, got {}", value.tag()))
}

fn host(value: &Value) -> ComputeResult<&HostArray> {
    match value {
        Value::Host(a) => Ok(a),
        other => Err(unexpected(TypeTag::Host, other)),
    }
}

fn buffer(value: &Value) -> ComputeResult<&Buffer> {
    match value {
        Value::Buffer(b) => Ok(b),
        other => Err(unexpected(TypeTag::Buffer, other)),
    }
}

fn image(value: &Value) -> ComputeResult<&Image> {
    match value {
        Value::Image(i) => Ok(i),
        other => Err(unexpected(TypeTag::Image, other)),
    }
}

pub fn host_to_buffer(ctx: &ComputeContext, value: &Value) -> ComputeResult<Value> {
    Ok(Value::Buffer(ctx.upload_buffer(host(value)?)?))
}

pub fn buffer_to_host(_ctx: &ComputeContext, value: &Value) -> ComputeResult<Value> {
    Ok(Value::Host(buffer(value)?.read_host()?))
}

pub fn host_to_image(ctx: &ComputeContext, value: &Value) -> ComputeResult<Value> {
    Ok(Value::Image(ctx.upload_image(host(value)?)?))
}

pub fn image_to_host(_ctx: &ComputeContext, value: &Value) -> ComputeResult<Value> {
    Ok(Value::Host(image(value)?.read_host()?))
}

pub fn buffer_to_image(ctx: &ComputeContext, value: &Value) -> ComputeResult<Value> {
    let src = buffer(value)?;
    let dst = ctx.create_image_for(src)?;
    ctx.copy_buffer_to_image(src, &dst)?;
    Ok(Value::Image(dst))
}

pub fn image_to_buffer(ctx: &ComputeContext, value: &Value) -> ComputeResult<Value> {
    let src = image(value)?;
    let dst = ctx.create_buffer_for(src)?;
    ctx.copy_image_to_buffer(src, &dst)?;
    Ok(Value::Buffer(dst))
}
