//! Reference advertisement sent before negotiation: optional transport prefix, the capability
//! carrying first line, every ref (with peeled tag targets), then a flush.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use super::pktline::{add_flush, add_pkt_line_string};
use super::types::{Capability, LF, NUL, ObjectId, SP};

/// One line of the advertisement prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixLine {
    Line(String),
    Flush,
}

/// References offered to the client, produced once per session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisedRefs {
    pub prefix: Vec<PrefixLine>,
    pub head: Option<ObjectId>,
    /// Sorted by ref name.
    pub refs: BTreeMap<String, ObjectId>,
    /// Peeled targets of annotated tags, keyed by tag ref name.
    pub peeled: BTreeMap<String, ObjectId>,
    pub capabilities: Vec<Capability>,
}

impl AdvertisedRefs {
    /// Prefix required by the smart HTTP protocol on `info/refs`.
    pub fn set_service_prefix(&mut self, service: &str) {
        self.prefix = vec![
            PrefixLine::Line(format!("# service={service}")),
            PrefixLine::Flush,
        ];
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none() && self.refs.is_empty()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        for line in &self.prefix {
            match line {
                PrefixLine::Line(text) => add_pkt_line_string(&mut buf, format!("{text}{LF}")),
                PrefixLine::Flush => add_flush(&mut buf),
            }
        }

        let cap_list = self
            .capabilities
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");

        // The first line MUST carry the capability list behind a NUL.
        let mut refs = self.refs.iter();
        match (&self.head, refs.next()) {
            (Some(head), first) => {
                add_pkt_line_string(&mut buf, format!("{head}{SP}HEAD{NUL}{cap_list}{LF}"));
                if let Some((name, id)) = first {
                    self.add_ref(&mut buf, name, id);
                }
            }
            (None, Some((name, id))) => {
                add_pkt_line_string(&mut buf, format!("{id}{SP}{name}{NUL}{cap_list}{LF}"));
                self.add_peeled(&mut buf, name);
            }
            (None, None) => {
                let zero = ObjectId::zero();
                add_pkt_line_string(
                    &mut buf,
                    format!("{zero}{SP}capabilities^{{}}{NUL}{cap_list}{LF}"),
                );
            }
        }

        for (name, id) in refs {
            self.add_ref(&mut buf, name, id);
        }

        add_flush(&mut buf);
        tracing::debug!(len = buf.len(), "encoded reference advertisement");
        buf.freeze()
    }

    fn add_ref(&self, buf: &mut BytesMut, name: &str, id: &ObjectId) {
        add_pkt_line_string(buf, format!("{id}{SP}{name}{LF}"));
        self.add_peeled(buf, name);
    }

    fn add_peeled(&self, buf: &mut BytesMut, name: &str) {
        if let Some(peeled) = self.peeled.get(name) {
            add_pkt_line_string(buf, format!("{peeled}{SP}{name}^{{}}{LF}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::pktline::read_pkt_line;

    fn id(c: char) -> ObjectId {
        c.to_string().repeat(40).parse().unwrap()
    }

    fn lines(mut bytes: Bytes) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            let (consumed, line) = read_pkt_line(&mut bytes);
            if consumed == 0 {
                break;
            }
            if consumed == 4 {
                out.push("<flush>".to_string());
            } else {
                out.push(String::from_utf8(line.to_vec()).unwrap());
            }
        }
        out
    }

    #[test]
    fn encodes_head_refs_and_peeled_tags() {
        let mut adv = AdvertisedRefs {
            head: Some(id('a')),
            capabilities: vec![Capability::OfsDelta, Capability::SideBand64k],
            ..Default::default()
        };
        adv.refs.insert("refs/tags/v1".to_string(), id('c'));
        adv.refs.insert("refs/heads/main".to_string(), id('a'));
        adv.peeled.insert("refs/tags/v1".to_string(), id('b'));

        let got = lines(adv.encode());
        assert_eq!(
            got,
            vec![
                format!("{} HEAD\0ofs-delta side-band-64k\n", id('a')),
                format!("{} refs/heads/main\n", id('a')),
                format!("{} refs/tags/v1\n", id('c')),
                format!("{} refs/tags/v1^{{}}\n", id('b')),
                "<flush>".to_string(),
            ]
        );
    }

    #[test]
    fn empty_repository_advertises_capabilities_only() {
        let adv = AdvertisedRefs {
            capabilities: vec![Capability::OfsDelta],
            ..Default::default()
        };
        assert!(adv.is_empty());
        let got = lines(adv.encode());
        assert_eq!(
            got,
            vec![
                format!("{} capabilities^{{}}\0ofs-delta\n", ObjectId::zero()),
                "<flush>".to_string(),
            ]
        );
    }

    #[test]
    fn service_prefix_comes_first() {
        let mut adv = AdvertisedRefs {
            head: Some(id('d')),
            ..Default::default()
        };
        adv.set_service_prefix("git-upload-pack");
        let encoded = adv.encode();
        assert!(encoded.starts_with(b"001e# service=git-upload-pack\n0000"));
    }

    #[test]
    fn detached_refs_without_head_carry_capabilities_on_first_ref() {
        let mut adv = AdvertisedRefs {
            capabilities: vec![Capability::ThinPack],
            ..Default::default()
        };
        adv.refs.insert("refs/heads/dev".to_string(), id('e'));
        let got = lines(adv.encode());
        assert_eq!(got[0], format!("{} refs/heads/dev\0thin-pack\n", id('e')));
        assert_eq!(got.len(), 2);
    }
}
