use evemu_core::{dump, CallError, CharacterId, ClientId, DumpLevel, WireValue};

use crate::bound::BindableService;

/// Who is calling: the session a request arrived on and the character
/// logged in on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub client_id: ClientId,
    pub character_id: CharacterId,
    pub name: String,
}

impl ClientContext {
    pub fn new(client_id: ClientId, character_id: CharacterId, name: impl Into<String>) -> Self {
        Self {
            client_id,
            character_id,
            name: name.into(),
        }
    }
}

/// One incoming remote call. Lives only for the duration of a dispatch.
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    pub service: &'a str,
    pub method: &'a str,
    /// Items of the argument tuple.
    pub args: &'a [WireValue],
    pub client: &'a ClientContext,
}

impl<'a> CallRequest<'a> {
    pub fn new(
        service: &'a str,
        method: &'a str,
        args: &'a [WireValue],
        client: &'a ClientContext,
    ) -> Self {
        Self {
            service,
            method,
            args,
            client,
        }
    }

    /// Dump the argument tuple if `level` is enabled.
    pub fn dump(&self, level: DumpLevel) {
        if !level.is_enabled() {
            return;
        }
        let label = format!(
            "{}::{} call from {} ({} args)",
            self.service,
            self.method,
            self.client.name,
            self.args.len()
        );
        dump(level, &label, &WireValue::Tuple(self.args.to_vec()));
    }
}

/// A named, remotely callable service.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Route `call` to the handler registered under `call.method`.
    fn dispatch(&self, call: &CallRequest<'_>) -> Result<WireValue, CallError>;

    /// Registered method names, in registration order.
    fn methods(&self) -> Vec<&str>;

    /// Services that hand out bound objects override this.
    fn as_bindable(&self) -> Option<&dyn BindableService> {
        None
    }
}
