#![no_main]

use libfuzzer_sys::fuzz_target;
use logferry_core::config::PipelineDefinition;
use logferry_pipeline::{Pipeline, default_registry};

fuzz_target!(|data: &[u8]| {
    // 정의 파서는 &str을 받으므로 UTF-8 변환 필요
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };
    let registry = default_registry();
    for parsed in [PipelineDefinition::from_yaml(content), PipelineDefinition::from_json(content)] {
        if let Ok(definition) = parsed {
            // 조립은 소켓을 열지 않으므로 퍼징에 안전함
            let _ = Pipeline::assemble(definition, &registry);
        }
    }
});
