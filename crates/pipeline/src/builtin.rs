//! 기본 제공 플러그인 등록
//!
//! 조립 전에 한 번 호출하는 초기화 단계입니다. 같은 이름으로 다시 등록하면
//! 나중 것이 이기므로, 호출자가 기본 플러그인을 교체할 수 있습니다.

use logferry_core::plugin::PluginRegistry;

use crate::codec::{DefaultCodec, JsonCodec};
use crate::filter::{AddFieldFilter, JsonFilter, RateLimitFilter, RemoveFieldFilter, TypeConvFilter};
use crate::input::{FileInput, SocketInput};
use crate::output::{StdoutOutput, TcpOutput};

/// 기본 제공 코덱/입력/필터/출력을 등록합니다.
pub fn register_builtins(registry: &mut PluginRegistry) {
    // codecs
    registry.register_codec("default", |_, _| Ok(Box::new(DefaultCodec::new())));
    registry.register_codec("json", |_, raw| Ok(Box::new(JsonCodec::new(raw.decode()?))));

    // inputs
    registry.register_input("socket", |ctx, raw| {
        Ok(Box::new(SocketInput::from_config(ctx, raw)?))
    });
    registry.register_input("file", |ctx, raw| Ok(Box::new(FileInput::from_config(ctx, raw)?)));

    // filters
    registry.register_filter("add_field", |_, raw| Ok(Box::new(AddFieldFilter::from_config(raw)?)));
    registry.register_filter("remove_field", |_, raw| {
        Ok(Box::new(RemoveFieldFilter::from_config(raw)?))
    });
    registry.register_filter("rate_limit", |_, raw| {
        Ok(Box::new(RateLimitFilter::from_config(raw)?))
    });
    registry.register_filter("typeconv", |_, raw| Ok(Box::new(TypeConvFilter::from_config(raw)?)));
    registry.register_filter("json", |_, raw| Ok(Box::new(JsonFilter::from_config(raw)?)));

    // outputs
    registry.register_output("stdout", |ctx, raw| Ok(Box::new(StdoutOutput::from_config(ctx, raw)?)));
    registry.register_output("tcp", |ctx, raw| Ok(Box::new(TcpOutput::from_config(ctx, raw)?)));
}

/// 기본 제공 플러그인이 등록된 레지스트리
pub fn default_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry);
    registry
}
