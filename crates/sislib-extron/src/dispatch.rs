//! Endpoint dispatch: the string-in, string-out surface of the engine.
//!
//! A request names an endpoint, a method, a session, and up to three string
//! arguments. Device-dependent endpoints are resolved against the session's
//! [`DeviceCategory`] and their replies decoded; public endpoints send one
//! fixed template and return the reply text.

use sislib_core::{DeviceCategory, Error, Method, Result, SessionKey};
use tracing::debug;

use crate::commands::{self, Endpoint, fill_template};
use crate::decode::{self, bool_text};
use crate::engine::Engine;
use crate::mixpoint::MixPoint;
use crate::models;
use crate::protocol::Reply;
use crate::session::Session;
use crate::volume;

/// Caller arguments padded to the three slots a request may carry.
#[derive(Debug, Clone, Copy)]
struct Args<'a>([&'a str; 3]);

impl<'a> Args<'a> {
    fn new(args: &[&'a str]) -> Self {
        let mut slots = [""; 3];
        for (slot, arg) in slots.iter_mut().zip(args) {
            *slot = *arg;
        }
        Args(slots)
    }

    fn at(&self, index: usize) -> &'a str {
        self.0[index]
    }
}

/// Parse a set-state argument. Quotes and padding are ignored.
fn parse_state(state: &str) -> Result<bool> {
    match state.trim().trim_matches('"').trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::Argument(format!(
            "state must be 'true' or 'false', got '{other}'"
        ))),
    }
}

fn flag(state: bool) -> &'static str {
    if state { "1" } else { "0" }
}

/// Whether the unit answered the request, successfully or not.
fn device_answered(result: &Result<String>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => matches!(
            e,
            Error::Device { .. } | Error::Protocol(_) | Error::UnexpectedReply(_)
        ),
    }
}

impl Engine {
    /// Serve one request.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn demo() -> sislib_core::Result<()> {
    /// use sislib_core::{Method, SessionKey};
    /// use sislib_extron::EngineBuilder;
    ///
    /// let engine = EngineBuilder::new().build()?;
    /// let key = SessionKey::new("admin:secret@10.0.0.5");
    /// let input = engine.dispatch("videoroute", Method::Get, &key, &["1"]).await?;
    /// engine.dispatch("videoroute", Method::Set, &key, &["3", "1"]).await?;
    /// # let _ = input;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn dispatch(
        &self,
        name: &str,
        method: Method,
        key: &SessionKey,
        args: &[&str],
    ) -> Result<String> {
        debug!(session = %key, endpoint = name, %method, ?args, "dispatch");
        let session = self.session(key);
        let result = self.route_request(name, method, &session, args).await;

        if device_answered(&result) {
            self.ensure_keepalive(&session);
        }
        if let Err(e) = &result {
            self.record(key, &format!("{method} {name}: {e}"));
        }
        result
    }

    /// Serve one request and render the result for the wire.
    ///
    /// The string is the value on success, `"unknown"` after terminal
    /// transport failure, and the error message otherwise.
    pub async fn dispatch_wire(
        &self,
        name: &str,
        method: Method,
        key: &SessionKey,
        args: &[&str],
    ) -> (String, Option<Error>) {
        match self.dispatch(name, method, key, args).await {
            Ok(value) => (value, None),
            Err(e) => (e.wire_text(), Some(e)),
        }
    }

    async fn route_request(
        &self,
        name: &str,
        method: Method,
        session: &Session,
        args: &[&str],
    ) -> Result<String> {
        if let Some(endpoint) = Endpoint::from_name(name) {
            if !endpoint.supports(method) {
                return Err(Error::Unsupported(format!(
                    "{method} is not supported for {endpoint}"
                )));
            }
            if !endpoint.is_implemented() {
                return Err(Error::NotImplemented(endpoint.name().to_string()));
            }
            let args = Args::new(args);
            return match method {
                Method::Get => self.get(endpoint, session, args).await,
                Method::Set => self.set(endpoint, session, args).await,
            };
        }

        if let Some(public) = commands::public_endpoint(name, method) {
            let command = fill_template(public.template, args);
            return self.execute(session, &command).await?.into_text();
        }

        Err(Error::Unsupported(format!("unrecognized setting: {name}")))
    }

    /// Fill `template` and run it.
    async fn run(&self, session: &Session, template: &str, args: &[&str]) -> Result<Reply> {
        self.execute(session, &fill_template(template, args)).await
    }

    async fn template(
        &self,
        session: &Session,
        endpoint: Endpoint,
        method: Method,
    ) -> Result<(DeviceCategory, &'static str)> {
        let category = self.category(session).await?;
        Ok((category, commands::resolve(endpoint, method, category)?))
    }

    // ---------------------------------------------------------------
    // GET
    // ---------------------------------------------------------------

    async fn get(&self, endpoint: Endpoint, session: &Session, args: Args<'_>) -> Result<String> {
        match endpoint {
            Endpoint::InputStatus => {
                let input = args.at(0);
                let (_, template) = self.template(session, endpoint, Method::Get).await?;
                let text = self.run(session, template, &[input]).await?.into_text()?;
                let model = session.model().await;
                let present = decode::input_status(&text, input, model.as_deref())?;
                Ok(bool_text(present).to_string())
            }
            Endpoint::VideoRoute | Endpoint::AudioAndVideoRoute => {
                let output = args.at(0);
                let (_, template) = self.template(session, endpoint, Method::Get).await?;
                let text = self.run(session, template, &[output]).await?.into_text()?;
                Ok(decode::route(&text))
            }
            Endpoint::AudioMute => {
                let output = args.at(0);
                let (category, template) = self.template(session, endpoint, Method::Get).await?;
                let scaler = category == DeviceCategory::Scaler;
                let slot = if scaler { models::mute_group(output)? } else { output };
                let text = self.run(session, template, &[slot]).await?.into_text()?;
                let value = if scaler { decode::group_value(&text) } else { text.as_str() };
                let model = session.model().await;
                let muted = decode::mute_status(value, output, category, model.as_deref())?;
                Ok(bool_text(muted).to_string())
            }
            Endpoint::VideoMute => {
                let output = args.at(0);
                let (category, template) = self.template(session, endpoint, Method::Get).await?;
                let text = self.run(session, template, &[]).await?.into_text()?;
                let model = session.model().await;
                let muted = decode::mute_status(&text, output, category, model.as_deref())?;
                Ok(bool_text(muted).to_string())
            }
            Endpoint::Volume => {
                let model = self.model(session).await?;
                let group = models::volume_group(&model, args.at(0))?;
                let (_, template) = self.template(session, endpoint, Method::Get).await?;
                let text = self.run(session, template, &[group]).await?.into_text()?;
                let percent = volume::device_to_percent(decode::group_value(&text))?;
                Ok(percent.to_string())
            }
            Endpoint::MatrixMute => {
                let point = MixPoint::resolve(args.at(0), args.at(1))?;
                let (_, template) = self.template(session, endpoint, Method::Get).await?;
                let address = point.to_string();
                let text = self.run(session, template, &[&address]).await?.into_text()?;
                let muted = decode::matrix_mute(&text, point.address())?;
                Ok(bool_text(muted).to_string())
            }
            Endpoint::MatrixVolume => {
                let point = MixPoint::resolve(args.at(0), args.at(1))?;
                let (_, template) = self.template(session, endpoint, Method::Get).await?;
                let address = point.to_string();
                let text = self.run(session, template, &[&address]).await?.into_text()?;
                Ok(decode::matrix_volume(&text, point.address())?.to_string())
            }
            other => Err(Error::Unsupported(format!("GET is not supported for {other}"))),
        }
    }

    // ---------------------------------------------------------------
    // SET
    // ---------------------------------------------------------------

    async fn set(&self, endpoint: Endpoint, session: &Session, args: Args<'_>) -> Result<String> {
        match endpoint {
            Endpoint::VideoRoute => {
                let (input, output) = (args.at(0), args.at(1));
                let (_, template) = self.template(session, endpoint, Method::Set).await?;
                let reply = self.run(session, template, &[input, output]).await?;
                decode::confirm(reply, |t| t.contains("In") && t.contains(input))?;
            }
            Endpoint::AudioAndVideoRoute => {
                let (input, output) = (args.at(0), args.at(1));
                let (_, template) = self.template(session, endpoint, Method::Set).await?;
                let reply = self.run(session, template, &[input, output]).await?;
                decode::confirm(reply, |t| {
                    t.contains("In") && t.contains(input) && t.contains("All")
                })?;
            }
            Endpoint::VideoMute => {
                let output = args.at(0);
                let state = flag(parse_state(args.at(1))?);
                self.set_video_mute(session, Endpoint::VideoMute, output, state).await?;
            }
            Endpoint::VideoSyncMute => {
                let output = args.at(0);
                if parse_state(args.at(1))? {
                    self.set_video_mute(session, Endpoint::VideoSyncMute, output, "2").await?;
                } else {
                    self.set_video_mute(session, Endpoint::VideoMute, output, "0").await?;
                }
            }
            Endpoint::AudioMute => {
                let output = args.at(0);
                let state = flag(parse_state(args.at(1))?);
                let (category, template) = self.template(session, endpoint, Method::Set).await?;
                match category {
                    DeviceCategory::Scaler => {
                        let group = models::mute_group(output)?;
                        let reply = self.run(session, template, &[group, state]).await?;
                        decode::confirm(reply, |t| t.contains("Grpm") && t.contains(group))?;
                    }
                    DeviceCategory::Switcher => {
                        let reply = self.run(session, template, &[state]).await?;
                        decode::confirm(reply, |t| t.contains("Amt"))?;
                    }
                    _ => {
                        let reply = self.run(session, template, &[output, state]).await?;
                        decode::confirm(reply, |t| t.contains("Amt"))?;
                    }
                }
            }
            Endpoint::Volume => {
                let model = self.model(session).await?;
                let group = models::volume_group(&model, args.at(0))?;
                let level = volume::percent_to_device(args.at(1))?.to_string();
                let (_, template) = self.template(session, endpoint, Method::Set).await?;
                let reply = self.run(session, template, &[group, &level]).await?;
                let expected = format!("GrpmD{group}*{level}");
                decode::confirm(reply, |t| t == expected)?;
            }
            Endpoint::MatrixMute => {
                let point = MixPoint::resolve(args.at(0), args.at(1))?;
                let state = match args.at(2) {
                    "" | "null" | "\"null\"" => {
                        return Err(Error::Argument("mute state is required".into()));
                    }
                    s if s.contains("false") => "0",
                    s if s.contains("true") => "1",
                    s => {
                        return Err(Error::Argument(format!(
                            "mute state must be 'true' or 'false', got '{s}'"
                        )));
                    }
                };
                let (_, template) = self.template(session, endpoint, Method::Set).await?;
                let address = point.to_string();
                let reply = self.run(session, template, &[&address, state]).await?;
                decode::confirm(reply, |t| {
                    t.contains(decode::MUTE_PREFIX) && t.contains(&address) && t.contains(state)
                })?;
            }
            Endpoint::MatrixVolume => {
                let point = MixPoint::resolve(args.at(0), args.at(1))?;
                let percent = args.at(2).trim_matches('"').trim();
                if percent.is_empty() {
                    return Err(Error::Argument("volume level (0-100) is required".into()));
                }
                let level = volume::percent_to_device(percent)?.to_string();
                let (_, template) = self.template(session, endpoint, Method::Set).await?;
                let address = point.to_string();
                let reply = self.run(session, template, &[&address, &level]).await?;
                decode::confirm(reply, |t| {
                    t.contains(decode::GAIN_PREFIX) && t.contains(&address) && t.contains(&level)
                })?;
            }
            other => {
                return Err(Error::Unsupported(format!("SET is not supported for {other}")));
            }
        }
        Ok("ok".to_string())
    }

    /// Send a video mute family command. Switchers take the state only.
    async fn set_video_mute(
        &self,
        session: &Session,
        endpoint: Endpoint,
        output: &str,
        state: &str,
    ) -> Result<()> {
        let (category, template) = self.template(session, endpoint, Method::Set).await?;
        let args = if category == DeviceCategory::Switcher {
            [state, ""]
        } else {
            [output, state]
        };
        let reply = self.run(session, template, &args).await?;
        decode::confirm(reply, |t| t.contains("Vmt") && t.contains(output))
    }
}
