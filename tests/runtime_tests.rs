mod common;

use common::{TestResult, init_logging, sheet, sheet_with, transform};
use std::sync::Arc;
use strix::{
    Capabilities, CollectingMessageSink, InMemoryResourceProvider, Pipeline, Processor,
    ProcessorConfig, ResourceError, StxError,
};

#[test]
fn test_process_doc_reads_from_resources() -> TestResult {
    init_logging();
    let resources = InMemoryResourceProvider::new()
        .with("other.xml", r#"<list><entry id="x"/><entry id="y"/></list>"#)?;
    let processor = Processor::compile(&sheet(
        r#"
        <stx:template match="doc">
            <loaded><stx:process-doc href="{@ref}"/></loaded>
        </stx:template>
        <stx:template match="list">
            <stx:process-children/>
        </stx:template>
        <stx:template match="entry">
            <e><stx:value-of select="@id"/></e>
        </stx:template>
        "#,
    ))?
    .with_capabilities(Capabilities::new().with_resources(Arc::new(resources)));
    assert_eq!(
        processor.transform_str(r#"<doc ref="other.xml"/>"#)?,
        "<loaded><e>x</e><e>y</e></loaded>"
    );
    Ok(())
}

#[test]
fn test_process_doc_without_provider_fails() -> TestResult {
    let result = transform(
        &sheet(r#"<stx:template match="doc"><stx:process-doc href="a.xml"/></stx:template>"#),
        "<doc/>",
    );
    assert!(
        matches!(
            result,
            Err(StxError::Resource(ResourceError::NoProvider(ref href))) if href == "a.xml"
        ),
        "{:?}",
        result
    );
    Ok(())
}

#[test]
fn test_unknown_buffer_is_reported() -> TestResult {
    let result = transform(
        &sheet(r#"<stx:template match="doc"><stx:process-buffer name="nope"/></stx:template>"#),
        "<doc/>",
    );
    match result {
        Err(StxError::UnknownBuffer { name, path }) => {
            assert_eq!(name, "nope");
            assert_eq!(path, "/doc");
        }
        other => panic!("expected an unknown buffer, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_recursive_replay_is_bounded() -> TestResult {
    let processor = Processor::compile(&sheet(
        r#"
        <stx:buffer name="loop"/>
        <stx:template match="doc">
            <stx:result-buffer name="loop" clear="yes"><item/></stx:result-buffer>
            <stx:process-buffer name="loop"/>
        </stx:template>
        <stx:template match="item">
            <stx:process-buffer name="loop"/>
        </stx:template>
        "#,
    ))?
    .with_config(ProcessorConfig {
        max_replay_depth: 4,
        ..ProcessorConfig::default()
    });
    assert!(matches!(
        processor.transform_str("<doc/>"),
        Err(StxError::ReplayDepth(4))
    ));
    Ok(())
}

#[test]
fn test_messages_reach_the_sink() -> TestResult {
    let sink = Arc::new(CollectingMessageSink::new());
    let processor = Processor::compile(&sheet(
        r#"
        <stx:template match="item">
            <stx:message select="concat('saw ', @n)"/>
        </stx:template>
        "#,
    ))?
    .with_capabilities(Capabilities::new().with_messages(sink.clone()));
    let out = processor.transform_str(r#"<item n="7"/>"#)?;
    assert_eq!(out, "");
    assert_eq!(sink.messages(), vec!["saw 7".to_string()]);
    Ok(())
}

#[test]
fn test_config_from_json_supplies_params() -> TestResult {
    let config: ProcessorConfig = serde_json::from_str(
        r#"{ "params": { "title": "Report" }, "strip_whitespace": true }"#,
    )?;
    let processor = Processor::compile(&sheet(
        r#"
        <stx:param name="title" required="yes"/>
        <stx:template match="doc">
            <h title="{$title}"><stx:process-children/></h>
        </stx:template>
        <stx:template match="x"><x/></stx:template>
        <stx:template match="text()"><t/></stx:template>
        "#,
    ))?;
    let input = "<doc>\n  <x/>\n  <x/>\n</doc>";
    assert_eq!(
        processor.clone().with_config(config).transform_str(input)?,
        r#"<h title="Report"><x/><x/></h>"#
    );
    assert_eq!(
        processor.with_param("title", "Raw").transform_str(input)?,
        r#"<h title="Raw"><t/><x/><t/><x/><t/></h>"#
    );
    Ok(())
}

#[test]
fn test_missing_required_param() -> TestResult {
    let result = transform(
        &sheet(
            r#"
            <stx:param name="title" required="yes"/>
            <stx:template match="doc"><out/></stx:template>
            "#,
        ),
        "<doc/>",
    );
    match result {
        Err(StxError::Execution { message, .. }) => {
            assert!(message.contains("'title'"), "{}", message)
        }
        other => panic!("expected a missing parameter, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_strip_space_attribute_on_sheet() -> TestResult {
    let out = transform(
        &sheet_with(
            r#"version="1.0" strip-space="yes" pass-through="text""#,
            r#"<stx:template match="doc"><d><stx:process-children/></d></stx:template>"#,
        ),
        "<doc>\n  <x>a</x>\n  <y>b</y>\n</doc>",
    )?;
    assert_eq!(out, "<d>ab</d>");
    Ok(())
}

#[test]
fn test_pipeline_feeds_each_stage() -> TestResult {
    let number = Processor::compile(&sheet(
        r#"
        <stx:variable name="n" select="0"/>
        <stx:template match="list"><list><stx:process-children/></list></stx:template>
        <stx:template match="item">
            <stx:assign name="n" select="$n + 1"/>
            <item n="{$n}"><stx:value-of select="@v"/></item>
        </stx:template>
        "#,
    ))?;
    let pick = Processor::compile(&sheet(
        r#"
        <stx:template match="list"><odd><stx:process-children/></odd></stx:template>
        <stx:template match="item[@n mod 2 = 1]">
            <stx:copy attributes="@*"/>
        </stx:template>
        "#,
    ))?;
    let pipeline = Pipeline::new().then(number).then(pick);
    let out = pipeline.transform_str(r#"<list><item v="a"/><item v="b"/><item v="c"/></list>"#)?;
    assert_eq!(out, r#"<odd><item n="1"/><item n="3"/></odd>"#);
    Ok(())
}

#[test]
fn test_group_buffer_outlives_the_document() -> TestResult {
    let processor = Processor::compile(&sheet(
        r#"
        <stx:buffer name="seen"/>
        <stx:template match="doc">
            <stx:result-buffer name="seen"><hit/></stx:result-buffer>
            <n><stx:value-of select="count(buffer('seen'))"/></n>
        </stx:template>
        <stx:template match="reset">
            <stx:result-buffer name="seen" clear="yes"/>
            <n><stx:value-of select="count(buffer('seen'))"/></n>
        </stx:template>
        "#,
    ))?;
    let outputs = ["<doc/>", "<doc/>", "<reset/>", "<doc/>"]
        .iter()
        .map(|input| processor.transform_str(input))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(outputs, ["<n>1</n>", "<n>2</n>", "<n>0</n>", "<n>1</n>"]);
    Ok(())
}

#[test]
fn test_innermost_group_wins_a_priority_tie() -> TestResult {
    let out = transform(
        &sheet(
            r#"
            <stx:group name="inner">
                <stx:template match="doc" public="yes">
                    <out><stx:process-children/></out>
                </stx:template>
                <stx:template match="item"><inner/></stx:template>
            </stx:group>
            <stx:template match="item"><outer/></stx:template>
            "#,
        ),
        "<doc><item/><item/></doc>",
    )?;
    assert_eq!(out, "<out><inner/><inner/></out>");
    Ok(())
}

#[test]
fn test_inner_variable_shadows_without_mutating() -> TestResult {
    let out = transform(
        &sheet(
            r#"
            <stx:template match="doc">
                <stx:variable name="v" select="'outer'"/>
                <stx:if test="true()">
                    <stx:variable name="v" select="'inner'"/>
                    <stx:assign name="v" select="concat($v, '!')"/>
                    <in><stx:value-of select="$v"/></in>
                </stx:if>
                <out><stx:value-of select="$v"/></out>
            </stx:template>
            "#,
        ),
        "<doc/>",
    )?;
    assert_eq!(out, "<in>inner!</in><out>outer</out>");
    Ok(())
}
