// coedit-common: wire frames, doc id rules, offset mapping, and the client-side editor binding

pub mod doc_id;
pub mod editor;
pub mod offset;
pub mod protocol;
