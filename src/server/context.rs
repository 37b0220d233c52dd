// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server context: device stores, broadcast handling and diagnostics
//!
//! A [`ServerContext`] maps device ids to their [`DeviceStore`]s, owns
//! the per-server [`ControlBlock`] and processes incoming requests. It
//! is wrapped in a [`ContextService`] to serve it on any of the server
//! transports.

use std::{
    collections::HashMap,
    fmt, future,
    sync::{Arc, Mutex},
};

use crate::{
    datastore::{control::ControlBlock, DeviceStore},
    device::DeviceId,
    frame::{DeviceRequest, DiagnosticsSubFunction, ExceptionCode, Request, Response},
};

use super::{dispatch::dispatch_request, Service};

/// A handler for a custom function code.
///
/// Called with the decoded request and the device store of the addressed
/// device. Returning `Ok(None)` suppresses the response.
pub type CustomHandler = Box<
    dyn FnMut(&Request<'_>, &mut dyn DeviceStore) -> Result<Option<Response>, ExceptionCode>
        + Send,
>;

enum Devices {
    /// One store answering any device id ("single mode").
    Single(Box<dyn DeviceStore>),
    /// One store per configured device id.
    Map(HashMap<DeviceId, Box<dyn DeviceStore>>),
}

/// Per-server state: device stores, control block and options.
pub struct ServerContext {
    devices: Devices,
    broadcast_enable: bool,
    ignore_missing_devices: bool,
    control: ControlBlock,
    custom_handlers: HashMap<u8, CustomHandler>,
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let devices = match &self.devices {
            Devices::Single(_) => "single".to_owned(),
            Devices::Map(map) => format!("{} device(s)", map.len()),
        };
        f.debug_struct("ServerContext")
            .field("devices", &devices)
            .field("broadcast_enable", &self.broadcast_enable)
            .field("ignore_missing_devices", &self.ignore_missing_devices)
            .finish_non_exhaustive()
    }
}

impl ServerContext {
    /// Create a context with a single store answering any device id.
    #[must_use]
    pub fn single(store: Box<dyn DeviceStore>) -> Self {
        Self {
            devices: Devices::Single(store),
            broadcast_enable: false,
            ignore_missing_devices: false,
            control: ControlBlock::new(),
            custom_handlers: HashMap::new(),
        }
    }

    /// Create a context with one store per device id. Requests for ids
    /// without a store are answered with
    /// [`ExceptionCode::GatewayTargetDevice`] or silently dropped, see
    /// [`Self::with_ignore_missing_devices`].
    #[must_use]
    pub fn with_devices(devices: HashMap<DeviceId, Box<dyn DeviceStore>>) -> Self {
        Self {
            devices: Devices::Map(devices),
            broadcast_enable: false,
            ignore_missing_devices: false,
            control: ControlBlock::new(),
            custom_handlers: HashMap::new(),
        }
    }

    /// Fan broadcast writes (device id 0) out to every store. Responses
    /// to broadcasts are always suppressed, with or without this option.
    #[must_use]
    pub fn with_broadcast_enable(mut self, broadcast_enable: bool) -> Self {
        self.broadcast_enable = broadcast_enable;
        self
    }

    /// Silently drop requests for unknown device ids instead of
    /// answering with [`ExceptionCode::GatewayTargetDevice`].
    #[must_use]
    pub fn with_ignore_missing_devices(mut self, ignore_missing_devices: bool) -> Self {
        self.ignore_missing_devices = ignore_missing_devices;
        self
    }

    /// Replace the control block, e.g. to preconfigure the device
    /// identification objects.
    #[must_use]
    pub fn with_control(mut self, control: ControlBlock) -> Self {
        self.control = control;
        self
    }

    /// The diagnostic and identification state of this server.
    pub fn control_mut(&mut self) -> &mut ControlBlock {
        &mut self.control
    }

    /// Install a handler for a custom function code. Requests with this
    /// function code are passed to the handler instead of the builtin
    /// dispatcher.
    pub fn register_custom_handler(&mut self, function: u8, handler: CustomHandler) {
        self.custom_handlers.insert(function, handler);
    }

    /// The store serving the given device id, if any.
    pub fn store_mut(&mut self, device_id: DeviceId) -> Option<&mut (dyn DeviceStore + 'static)> {
        match &mut self.devices {
            Devices::Single(store) => Some(store.as_mut()),
            Devices::Map(map) => map.get_mut(&device_id).map(Box::as_mut),
        }
    }

    /// Process one request addressed to `device_id`, maintaining the
    /// diagnostic counters. `Ok(None)` means that no response must be
    /// sent.
    pub fn process(
        &mut self,
        device_id: DeviceId,
        request: &Request<'_>,
    ) -> Result<Option<Response>, ExceptionCode> {
        self.control.counters.bus_message = self.control.counters.bus_message.wrapping_add(1);

        // In listen only mode everything except a restart communications
        // diagnostic is silently processed without a response.
        if self.control.listen_only
            && !matches!(
                request,
                Request::Diagnostics(DiagnosticsSubFunction::RestartCommunications, _)
            )
        {
            self.control.counters.server_no_response =
                self.control.counters.server_no_response.wrapping_add(1);
            return Ok(None);
        }

        if device_id == 0 {
            return self.process_broadcast(request);
        }

        self.control.counters.server_message =
            self.control.counters.server_message.wrapping_add(1);

        let Self {
            devices,
            control,
            custom_handlers,
            ignore_missing_devices,
            ..
        } = self;
        let store = match devices {
            Devices::Single(store) => store.as_mut(),
            Devices::Map(map) => match map.get_mut(&device_id) {
                Some(store) => store.as_mut(),
                None => {
                    control.counters.server_no_response =
                        control.counters.server_no_response.wrapping_add(1);
                    if *ignore_missing_devices {
                        log::debug!("Ignoring request for unknown device {device_id}");
                        return Ok(None);
                    }
                    return Err(ExceptionCode::GatewayTargetDevice);
                }
            },
        };

        let custom_handler = match request {
            Request::Custom(function, _) => custom_handlers.get_mut(function),
            _ => None,
        };
        let result = match custom_handler {
            Some(handler) => handler(request, store),
            None => dispatch_request(request, store, control),
        };

        match &result {
            Ok(Some(_)) => {
                control.counters.comm_event = control.counters.comm_event.wrapping_add(1);
            }
            Ok(None) => {
                control.counters.server_no_response =
                    control.counters.server_no_response.wrapping_add(1);
            }
            Err(exception) => {
                control.counters.bus_exception_error =
                    control.counters.bus_exception_error.wrapping_add(1);
                match exception {
                    ExceptionCode::ServerDeviceBusy => {
                        control.counters.server_busy =
                            control.counters.server_busy.wrapping_add(1);
                    }
                    ExceptionCode::Acknowledge => {
                        control.counters.server_nak =
                            control.counters.server_nak.wrapping_add(1);
                    }
                    _ => (),
                }
            }
        }
        result
    }

    fn process_broadcast(
        &mut self,
        request: &Request<'_>,
    ) -> Result<Option<Response>, ExceptionCode> {
        self.control.counters.server_message =
            self.control.counters.server_message.wrapping_add(1);
        self.control.counters.server_no_response =
            self.control.counters.server_no_response.wrapping_add(1);
        if !self.broadcast_enable {
            log::debug!("Ignoring broadcast request, broadcast is disabled");
            return Ok(None);
        }
        let Self {
            devices, control, ..
        } = self;
        match devices {
            Devices::Single(store) => {
                if let Err(exception) = dispatch_request(request, store.as_mut(), control) {
                    log::warn!("Broadcast request failed: {exception}");
                }
            }
            Devices::Map(map) => {
                for (device_id, store) in map.iter_mut() {
                    if let Err(exception) = dispatch_request(request, store.as_mut(), control) {
                        log::warn!("Broadcast request failed for device {device_id}: {exception}");
                    }
                }
            }
        }
        // Responses to broadcasts are always suppressed.
        Ok(None)
    }
}

/// Observes every request before it is processed.
pub type RequestTracer = Box<dyn Fn(&DeviceRequest<'_>) + Send + Sync>;

/// Rewrites the outcome of a request before it is sent, e.g. to inject
/// faults while testing client implementations.
pub type ResponseManipulator = Box<
    dyn Fn(
            &DeviceRequest<'_>,
            Result<Option<Response>, ExceptionCode>,
        ) -> Result<Option<Response>, ExceptionCode>
        + Send
        + Sync,
>;

/// A cloneable [`Service`] backed by a shared [`ServerContext`].
///
/// All connections of a server (and multiple servers, if desired) may
/// share one context; writes from one connection are observable by
/// subsequent reads from any other.
#[derive(Clone)]
pub struct ContextService {
    context: Arc<Mutex<ServerContext>>,
    request_tracer: Option<Arc<RequestTracer>>,
    response_manipulator: Option<Arc<ResponseManipulator>>,
}

impl fmt::Debug for ContextService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextService")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl ContextService {
    /// Create a service sharing the given context.
    #[must_use]
    pub fn new(context: Arc<Mutex<ServerContext>>) -> Self {
        Self {
            context,
            request_tracer: None,
            response_manipulator: None,
        }
    }

    /// The shared context, e.g. for seeding or inspecting stores.
    #[must_use]
    pub fn context(&self) -> Arc<Mutex<ServerContext>> {
        Arc::clone(&self.context)
    }

    /// Observe every incoming request.
    #[must_use]
    pub fn with_request_tracer(mut self, tracer: RequestTracer) -> Self {
        self.request_tracer = Some(Arc::new(tracer));
        self
    }

    /// Rewrite the outcome of every request before it is sent.
    #[must_use]
    pub fn with_response_manipulator(mut self, manipulator: ResponseManipulator) -> Self {
        self.response_manipulator = Some(Arc::new(manipulator));
        self
    }
}

impl From<ServerContext> for ContextService {
    fn from(context: ServerContext) -> Self {
        Self::new(Arc::new(Mutex::new(context)))
    }
}

impl Service for ContextService {
    type Request = DeviceRequest<'static>;
    type Response = Option<Response>;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        if let Some(tracer) = &self.request_tracer {
            tracer(&req);
        }
        let mut result = match self.context.lock() {
            Ok(mut context) => context.process(req.device_id, &req.request),
            Err(_poisoned) => {
                log::error!("Server context poisoned by a panicked handler");
                Err(ExceptionCode::ServerDeviceFailure)
            }
        };
        if let Some(manipulator) = &self.response_manipulator {
            result = manipulator(&req, result);
        }
        future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::datastore::{DeviceData, Sequential};

    fn device_data() -> Box<dyn DeviceStore> {
        Box::new(
            DeviceData::new(
                Box::new(Sequential::filled(0, 16, false)),
                Box::new(Sequential::filled(0, 16, false)),
                Box::new(Sequential::filled(0, 16, 0)),
                Box::new(Sequential::filled(0, 16, 0)),
            )
            .with_zero_mode(true),
        )
    }

    #[test]
    fn single_mode_answers_any_device_id() {
        let mut context = ServerContext::single(device_data());
        for device_id in [1, 42, 247] {
            let response = context
                .process(device_id, &Request::ReadHoldingRegisters(0, 1))
                .unwrap();
            assert_eq!(response, Some(Response::ReadHoldingRegisters(vec![0])));
        }
    }

    #[test]
    fn missing_device_yields_gateway_exception_or_silence() {
        let mut devices: HashMap<DeviceId, Box<dyn DeviceStore>> = HashMap::new();
        devices.insert(1, device_data());
        let mut context = ServerContext::with_devices(devices);

        let err = context
            .process(5, &Request::ReadCoils(0, 1))
            .unwrap_err();
        assert_eq!(err, ExceptionCode::GatewayTargetDevice);

        let mut devices: HashMap<DeviceId, Box<dyn DeviceStore>> = HashMap::new();
        devices.insert(1, device_data());
        let mut context =
            ServerContext::with_devices(devices).with_ignore_missing_devices(true);
        let response = context.process(5, &Request::ReadCoils(0, 1)).unwrap();
        assert_eq!(response, None);
    }

    #[test]
    fn broadcast_updates_every_store_and_suppresses_response() {
        let mut devices: HashMap<DeviceId, Box<dyn DeviceStore>> = HashMap::new();
        devices.insert(1, device_data());
        devices.insert(2, device_data());
        let mut context = ServerContext::with_devices(devices).with_broadcast_enable(true);

        let response = context
            .process(0, &Request::WriteSingleRegister(3, 0x1234))
            .unwrap();
        assert_eq!(response, None);

        for device_id in [1, 2] {
            let response = context
                .process(device_id, &Request::ReadHoldingRegisters(3, 1))
                .unwrap();
            assert_eq!(response, Some(Response::ReadHoldingRegisters(vec![0x1234])));
        }
    }

    #[test]
    fn listen_only_suppresses_until_restart() {
        let mut context = ServerContext::single(device_data());
        context
            .process(
                1,
                &Request::Diagnostics(
                    DiagnosticsSubFunction::ForceListenOnlyMode,
                    vec![0x0000].into(),
                ),
            )
            .unwrap();
        assert_eq!(
            context.process(1, &Request::ReadCoils(0, 1)).unwrap(),
            None
        );
        let response = context
            .process(
                1,
                &Request::Diagnostics(
                    DiagnosticsSubFunction::RestartCommunications,
                    vec![0x0000].into(),
                ),
            )
            .unwrap();
        assert!(response.is_some());
        assert!(context
            .process(1, &Request::ReadCoils(0, 1))
            .unwrap()
            .is_some());
    }

    #[test]
    fn custom_handler_intercepts_custom_function_code() {
        let mut context = ServerContext::single(device_data());
        context.register_custom_handler(
            0x41,
            Box::new(|request, _store| {
                let Request::Custom(function, data) = request else {
                    return Err(ExceptionCode::IllegalFunction);
                };
                Ok(Some(Response::Custom(*function, data.to_vec())))
            }),
        );
        let response = context
            .process(1, &Request::Custom(0x41, vec![0xAA].into()))
            .unwrap();
        assert_eq!(response, Some(Response::Custom(0x41, vec![0xAA])));

        // Unregistered custom codes keep answering IllegalFunction.
        let err = context
            .process(1, &Request::Custom(0x42, vec![].into()))
            .unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalFunction);
    }

    #[test]
    fn counters_track_messages_and_exceptions() {
        let mut context = ServerContext::single(device_data());
        context.process(1, &Request::ReadCoils(0, 1)).unwrap();
        context
            .process(1, &Request::ReadCoils(0, 5000))
            .unwrap_err();
        let control = context.control_mut();
        assert_eq!(control.counters.bus_message, 2);
        assert_eq!(control.counters.server_message, 2);
        assert_eq!(control.counters.bus_exception_error, 1);
        assert_eq!(control.counters.comm_event, 1);
    }
}
