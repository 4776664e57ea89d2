mod oncebox;

pub(crate) mod append_log;

pub(crate) use append_log::AppendLog;
pub(crate) use oncebox::OnceBoxSlice;
