mod common;

use common::{TestResult, init_logging, sheet};
use std::sync::Arc;
use strix::{
    Capabilities, EventHandler, FilterError, FilterHandler, FilterRegistry, FilterRequest,
    InMemoryResourceProvider, Processor, STX_NAMESPACE, StxError, StxEvent,
};

/// Upper-cases character data and passes everything else through.
struct Shout {
    prefix: String,
}

impl FilterHandler for Shout {
    fn event(
        &mut self,
        event: &StxEvent,
        output: &mut dyn EventHandler,
    ) -> Result<(), FilterError> {
        match event {
            StxEvent::Characters(text) => {
                output.characters(&format!("{}{}", self.prefix, text.to_uppercase()))?
            }
            other => output.event(other)?,
        }
        Ok(())
    }

    fn finish(&mut self, output: &mut dyn EventHandler) -> Result<(), FilterError> {
        output.comment("shouted")?;
        Ok(())
    }
}

fn registry() -> FilterRegistry {
    FilterRegistry::new().with("urn:x-shout", |request: &FilterRequest| {
        Ok(Box::new(Shout {
            prefix: request.param("prefix").unwrap_or_default().to_string(),
        }) as Box<dyn FilterHandler>)
    })
}

fn processor(body: &str) -> Result<Processor, StxError> {
    init_logging();
    Ok(Processor::compile(&sheet(body))?
        .with_capabilities(Capabilities::new().with_resolver(Arc::new(registry()))))
}

#[test]
fn test_children_are_delegated_live() -> TestResult {
    let processor = processor(
        r#"
        <stx:template match="doc">
            <out><stx:process-children filter-method="urn:x-shout"/></out>
        </stx:template>
        <stx:template match="p">
            <never/>
        </stx:template>
        "#,
    )?;
    let out = processor.transform_str("<doc><p>hi</p> there</doc>")?;
    assert_eq!(out, "<out><p>HI</p> THERE<!--shouted--></out>");
    Ok(())
}

#[test]
fn test_filter_receives_parameters() -> TestResult {
    let processor = processor(
        r#"
        <stx:template match="doc">
            <out>
                <stx:process-children filter-method="urn:x-shout">
                    <stx:with-param name="prefix" select="concat('*', ' ')"/>
                </stx:process-children>
            </out>
        </stx:template>
        "#,
    )?;
    assert_eq!(
        processor.transform_str("<doc>a</doc>")?,
        "<out>* A<!--shouted--></out>"
    );
    Ok(())
}

#[test]
fn test_buffer_through_filter() -> TestResult {
    let processor = processor(
        r#"
        <stx:template match="doc">
            <stx:buffer name="b"/>
            <stx:result-buffer name="b">quiet</stx:result-buffer>
            <out><stx:process-buffer name="b" filter-method="urn:x-shout"/></out>
        </stx:template>
        "#,
    )?;
    assert_eq!(
        processor.transform_str("<doc/>")?,
        "<out>QUIET<!--shouted--></out>"
    );
    Ok(())
}

#[test]
fn test_filter_available() -> TestResult {
    let processor = processor(
        r#"
        <stx:template match="doc">
            <r>
                <stx:value-of select="filter-available('urn:x-shout')"/>
                <stx:text>,</stx:text>
                <stx:value-of select="filter-available('urn:x-missing')"/>
                <stx:text>,</stx:text>
                <stx:value-of select="filter-available('http://stx.sourceforge.net/2002/ns')"/>
            </r>
        </stx:template>
        "#,
    )?;
    assert_eq!(processor.transform_str("<doc/>")?, "<r>true,false,true</r>");
    Ok(())
}

#[test]
fn test_unresolved_filter_is_fatal() -> TestResult {
    let processor = processor(
        r#"
        <stx:template match="doc">
            <stx:process-children filter-method="urn:x-missing"/>
        </stx:template>
        "#,
    )?;
    match processor.transform_str("<doc/>") {
        Err(StxError::UnresolvedFilter { uri }) => assert_eq!(uri, "urn:x-missing"),
        other => panic!("expected an unresolved filter, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_stx_sheet_as_filter() -> TestResult {
    init_logging();
    let inner = sheet(
        r#"
        <stx:template match="p">
            <para><stx:value-of select="$mark"/><stx:process-children/></para>
        </stx:template>
        <stx:param name="mark" select="''"/>
        "#,
    );
    let inner = inner.replace(r#"version="1.0""#, r#"version="1.0" pass-through="text""#);
    let resources = InMemoryResourceProvider::new().with("inner.stx", inner)?;
    let outer = format!(
        r#"
        <stx:template match="doc">
            <out>
                <stx:process-children filter-method="{}" filter-src="url('inner.stx')">
                    <stx:with-param name="mark" select="'#'"/>
                </stx:process-children>
            </out>
        </stx:template>
        "#,
        STX_NAMESPACE
    );
    let processor = Processor::compile(&sheet(&outer))?
        .with_capabilities(Capabilities::new().with_resources(Arc::new(resources)));
    assert_eq!(
        processor.transform_str("<doc><p>one</p><p>two</p></doc>")?,
        "<out><para>#one</para><para>#two</para></out>"
    );
    Ok(())
}

#[test]
fn test_sheet_falls_back_when_filter_is_missing() -> TestResult {
    let body = r#"
        <stx:template match="doc">
            <out>
                <stx:choose>
                    <stx:when test="filter-available('urn:x-shout')">
                        <stx:process-children filter-method="urn:x-shout"/>
                    </stx:when>
                    <stx:otherwise>
                        <stx:process-children/>
                    </stx:otherwise>
                </stx:choose>
            </out>
        </stx:template>
        <stx:template match="text()"><stx:value-of select="."/></stx:template>
        "#;
    assert_eq!(
        processor(body)?.transform_str("<doc>quiet</doc>")?,
        "<out>QUIET<!--shouted--></out>"
    );
    assert_eq!(
        Processor::compile(&sheet(body))?.transform_str("<doc>quiet</doc>")?,
        "<out>quiet</out>"
    );
    Ok(())
}
