mod fairness;
mod mysql_roundtrip;
