//! WhatsApp messaging channel: provider clients, template definitions, and
//! the builder that turns stored campaign parameters into provider payloads.

pub mod recording;
pub mod templates;
pub mod whatsapp;

pub use recording::{RecordingProvider, RecordingProviderFactory};
pub use templates::{PlaceholderRequirements, TemplateMessageBuilder, TemplateParameters};
pub use whatsapp::{
    MessagingProvider, ProviderFactory, SendResponse, TemplateDefinition, TemplateMessage,
    WhatsAppProvider, WhatsAppProviderFactory,
};
