//! Generational ids for everything the graph owns.
//!
//! Every cross-reference between `Pass`, `Attachment`,
//! `AttachmentDef`/`AttachmentUse`, and the realized views is a `slotmap`
//! key indexing into a graph-owned `SlotMap`/`SecondaryMap` rather than a
//! borrowed reference. A key can never dangle and `RenderGraph` remains
//! the single owner of everything it allocates.

use slotmap::new_key_type;

new_key_type! {
    /// Identifies a logical [`crate::attachment::Attachment`].
    pub struct AttachmentId;

    /// Identifies a [`crate::pass::Pass`] in the caller-declared order.
    ///
    /// Synthesized `SyncPass`es also receive a `PassId`, drawn from the
    /// same key space, once they are spliced into the compiled pass
    /// sequence (see [`crate::graph::RenderGraph::compile`]).
    pub struct PassId;

    /// Identifies one `Def` (a pass's declared write of an attachment).
    pub struct DefId;

    /// Identifies one `Use` (a pass's declared read of an attachment).
    pub struct UseId;

    /// Identifies a realized image view, one per distinct def and per
    /// distinct use.
    pub struct ViewId;
}
