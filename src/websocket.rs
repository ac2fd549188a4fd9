//! # Media Stream WebSocket Handler
//!
//! Accepts the telephony provider's media-stream socket at `/media-stream` and
//! bridges it to the realtime speech model.
//!
//! ## Connection Flow:
//! 1. **Upgrade**: `GET /media-stream?callSid=CA...`; a missing call id is a 400,
//!    a saturated bridge a 503
//! 2. **Model connect**: the actor opens the Model Link in the background while
//!    telephony frames keep flowing
//! 3. **Bridging**: telephony frames and model events both go through the
//!    `CallBridge`, whose actions the actor executes in order
//! 4. **Teardown**: whichever side ends first, both sockets are closed once
//!
//! ## Actor Model:
//! One actor per call. The actor is the only owner of the call's state, so
//! model events and telephony frames are handled strictly one at a time.

use crate::bridge::{BridgeAction, BridgeSettings, CallBridge};
use crate::error::{AppError, LinkError};
use crate::realtime::{ModelLink, ServerEvent};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// WebSocket actor for one bridged call.
pub struct MediaStreamSocket {
    state: web::Data<AppState>,

    /// Routing rules and per-call state
    bridge: CallBridge,

    /// Upstream link, present once connected and until closed
    model: Option<ModelLink>,

    /// Carries `call_sid` and `connection_id` on every log line of this call
    span: Span,
}

impl MediaStreamSocket {
    pub fn new(state: web::Data<AppState>, call_sid: String) -> Self {
        let bridge = CallBridge::new(call_sid, BridgeSettings::from(state.config()));
        let span = info_span!(
            "call",
            call_sid = %bridge.session().call_sid,
            connection_id = %bridge.session().connection_id
        );
        Self {
            state,
            bridge,
            model: None,
            span,
        }
    }

    /// Execute bridge actions in order.
    fn apply(&mut self, actions: Vec<BridgeAction>, ctx: &mut ws::WebsocketContext<Self>) {
        for action in actions {
            match action {
                BridgeAction::SendToCaller(text) => ctx.text(text),
                BridgeAction::SendToModel(event) => match &self.model {
                    Some(model) if !model.is_closed() => {
                        if let Err(err) = model.send(event) {
                            debug!(error = %err, "Model link gone, event dropped");
                        }
                    }
                    _ => debug!(kind = event.kind(), "Model link not connected, event dropped"),
                },
                BridgeAction::CloseModel => self.close_model(),
                BridgeAction::CloseCaller => {
                    ctx.close(Some(ws::CloseReason {
                        code: ws::CloseCode::Normal,
                        description: None,
                    }));
                    ctx.stop();
                }
            }
        }
    }

    fn close_model(&mut self) {
        if let Some(mut model) = self.model.take() {
            model.close();
        }
    }

    fn teardown(&mut self, reason: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let actions = self.bridge.teardown(reason);
        self.apply(actions, ctx);
    }

    fn on_model_connect(
        &mut self,
        result: Result<(ModelLink, mpsc::Receiver<ServerEvent>), LinkError>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        match result {
            Ok((mut link, events)) => {
                if self.bridge.is_torn_down() {
                    // Caller hung up while the handshake was in flight.
                    link.close();
                    return;
                }
                self.model = Some(link);
                self.bridge.on_model_connected();
                ctx.add_stream(ReceiverStream::new(events));
            }
            Err(err) => {
                error!(error = %err, "Failed to connect to realtime model");
                self.teardown("model connect failed", ctx);
            }
        }
    }
}

impl Actor for MediaStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let _enter = self.span.enter();
        info!("Media stream connected");

        let config = self.state.config().realtime.clone();
        let connect = async move { ModelLink::connect(&config).await }.instrument(self.span.clone());

        ctx.spawn(
            connect
                .into_actor(self)
                .map(|result, act, ctx| {
                    let span = act.span.clone();
                    let _enter = span.enter();
                    act.on_model_connect(result, ctx);
                }),
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let span = self.span.clone();
        let _enter = span.enter();

        // The caller socket is already gone; only the model side may need closing.
        self.bridge.teardown("media stream actor stopped");
        self.close_model();
        self.state.call_ended(self.bridge.stats());

        info!(
            status = self.bridge.session().status().as_str(),
            link_state = self.bridge.telephony().state().as_str(),
            "Media stream closed"
        );
    }
}

/// Telephony frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let span = self.span.clone();
        let _enter = span.enter();

        match msg {
            Ok(ws::Message::Text(text)) => {
                let actions = self.bridge.on_telephony_text(&text);
                self.apply(actions, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                debug!(bytes = data.len(), "Ignoring binary frame on media stream");
            }
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) | Ok(ws::Message::Nop) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(?reason, "Telephony socket closed");
                self.teardown("telephony socket closed", ctx);
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Err(err) => {
                error!(error = %err, "Telephony socket protocol error");
                self.teardown("telephony socket error", ctx);
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        let span = self.span.clone();
        let _enter = span.enter();
        self.teardown("telephony stream ended", ctx);
        ctx.stop();
    }
}

/// Model events.
impl StreamHandler<ServerEvent> for MediaStreamSocket {
    fn handle(&mut self, event: ServerEvent, ctx: &mut Self::Context) {
        let span = self.span.clone();
        let _enter = span.enter();
        let actions = self.bridge.on_model_event(event);
        self.apply(actions, ctx);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        let span = self.span.clone();
        let _enter = span.enter();
        info!("Model event stream ended");
        self.teardown("model stream ended", ctx);
    }
}

/// `GET /media-stream` upgrade handler.
///
/// ## Query parameters:
/// - `callSid` (or `CallSid`): required, identifies the call in logs and metrics
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let query = web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .unwrap_or_else(|_| web::Query(HashMap::new()));

    let call_sid = query
        .get("callSid")
        .or_else(|| query.get("CallSid"))
        .map(|sid| sid.trim())
        .filter(|sid| !sid.is_empty())
        .map(str::to_string);

    let Some(call_sid) = call_sid else {
        warn!(peer = ?req.connection_info().peer_addr(), "Media stream request without callSid");
        return Err(AppError::BadRequest("missing callSid query parameter".to_string()).into());
    };

    if !state.try_admit_call() {
        warn!(call_sid = %call_sid, "Call limit reached, refusing media stream");
        return Err(AppError::Unavailable("too many concurrent calls".to_string()).into());
    }

    info!(call_sid = %call_sid, "Media stream upgrade");

    let socket = MediaStreamSocket::new(state.clone(), call_sid);
    ws::start(socket, &req, stream).inspect_err(|err| {
        // The actor never started, so nothing else will release the slot.
        warn!(error = %err, "Media stream handshake failed");
        state.call_ended(&Default::default());
    })
}
