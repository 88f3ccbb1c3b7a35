use hotbundle_core::TaskKind;

#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    pub package_version: String,
    pub installation_id: String,
    pub rolled_back_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyStep {
    pub kind: TaskKind,
    pub file: String,
    pub origin_hash: Option<String>,
}
