//! Chains of processors, each feeding the next.

use crate::error::StxError;
use crate::processor::Processor;
use crate::source;
use crate::writer::XmlWriter;
use strix_types::EventHandler;

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Processor>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage that receives the output of the previous one.
    pub fn then(mut self, processor: Processor) -> Self {
        self.stages.push(processor);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Builds the chain of transformers in front of `sink`. Without stages the
    /// sink itself is returned.
    pub fn handler<'h>(&self, sink: impl EventHandler + 'h) -> Box<dyn EventHandler + 'h> {
        let mut handler: Box<dyn EventHandler + 'h> = Box::new(sink);
        for stage in self.stages.iter().rev() {
            handler = Box::new(stage.transformer(handler));
        }
        handler
    }

    pub fn transform_to(&self, xml: &str, sink: &mut dyn EventHandler) -> Result<(), StxError> {
        log::debug!("Running a pipeline of {} stage(s)", self.stages.len());
        let mut handler = self.handler(sink);
        source::parse(xml, handler.as_mut(), false)
    }

    pub fn transform_str(&self, xml: &str) -> Result<String, StxError> {
        let mut writer = XmlWriter::new();
        self.transform_to(xml, &mut writer)?;
        Ok(writer.into_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRAP: &str = r#"
        <stx:transform version="1.0" xmlns:stx="http://stx.sourceforge.net/2002/ns" pass-through="all">
            <stx:template match="/*">
                <wrapped><stx:process-self/></wrapped>
            </stx:template>
        </stx:transform>
    "#;

    const RENAME: &str = r#"
        <stx:transform version="1.0" xmlns:stx="http://stx.sourceforge.net/2002/ns" pass-through="all">
            <stx:template match="item">
                <entry><stx:process-children/></entry>
            </stx:template>
        </stx:transform>
    "#;

    #[test]
    fn test_stages_run_in_order() {
        let pipeline = Pipeline::new()
            .then(Processor::compile(RENAME).unwrap())
            .then(Processor::compile(WRAP).unwrap());
        assert_eq!(pipeline.len(), 2);
        let out = pipeline.transform_str("<list><item>a</item></list>").unwrap();
        assert_eq!(out, "<wrapped><list><entry>a</entry></list></wrapped>");
    }

    #[test]
    fn test_empty_pipeline_copies_input() {
        let out = Pipeline::new().transform_str("<a x=\"1\">t</a>").unwrap();
        assert_eq!(out, "<a x=\"1\">t</a>");
    }
}
