// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus servers

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "tls")]
pub mod tls;

#[cfg(feature = "udp")]
pub mod udp;

pub mod context;

mod dispatch;

use std::future::Future;

use crate::frame::{DeviceRequest, ExceptionCode, OptionalResponsePdu};

pub use self::context::{ContextService, ServerContext};

/// A Modbus server service.
///
/// The service is called once per received request and returns either a
/// response or an exception code that is sent back with the request's
/// function code. Returning `None` (via `Option<Response>`) suppresses
/// the reply, e.g. for ignored devices; broadcast requests are never
/// answered regardless of the returned value.
pub trait Service: Send + Sync {
    /// Requests handled by the service.
    type Request: From<DeviceRequest<'static>> + Send;

    /// Responses given by the service, either [`Response`] or
    /// [`Option<Response>`] if the service wants to suppress replies.
    type Response: Into<OptionalResponsePdu> + Send;

    /// Errors produced by the service, reported to the client as
    /// exception responses.
    type Exception: Into<ExceptionCode> + Send;

    /// The future response value.
    type Future: Future<Output = Result<Self::Response, Self::Exception>> + Send;

    /// Process the request and return the response asynchronously.
    fn call(&self, req: Self::Request) -> Self::Future;
}
