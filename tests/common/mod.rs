pub(crate) mod chain;

pub(crate) mod consensus;

pub(crate) mod logging;

pub(crate) mod network;

pub(crate) mod pools;

pub(crate) mod status;

pub(crate) mod timing;
