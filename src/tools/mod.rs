//! 能力层：能力描述、注册表与内置能力（DateProvider、Echo、WebFetch、WebFetchMany、Terminal）

pub mod datetime;
pub mod echo;
pub mod fetch;
pub mod fetch_many;
pub mod registry;
pub mod schema;
pub mod terminal;

pub use datetime::DateProvider;
pub use echo::EchoProvider;
pub use fetch::WebFetchProvider;
pub use fetch_many::WebFetchManyProvider;
pub use registry::{
    validate_against_schema, CapabilityInput, CapabilityOutput, CapabilityProvider,
    CapabilityRegistry,
};
pub use schema::{
    complete_function_schema, directive_schema_json, render_descriptors, CapabilityDescriptor,
    FieldSpec, FunctionSchema, ParamSpec, ParamType, COMPLETE_ACTION,
};
pub use terminal::TerminalProvider;
