//! Profile sub-page records: applying, paying, academics, student life and
//! campus info.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::PageFields;

/// Declares a record whose named fields are pulled out of [`PageFields`]
/// by key (first matching alias wins). Leftovers stay in `fields`/`lists`.
macro_rules! profile_record {
    (
        $(#[$meta:meta])*
        $name:ident {
            values { $($field:ident => [$($key:literal),+ $(,)?]),* $(,)? }
            lists { $($list:ident => [$($lkey:literal),+ $(,)?]),* $(,)? }
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<String>,
            )*
            $(
                #[serde(default, skip_serializing_if = "Vec::is_empty")]
                pub $list: Vec<String>,
            )*
            #[serde(default)]
            pub fields: BTreeMap<String, String>,
            #[serde(default)]
            pub lists: BTreeMap<String, Vec<String>>,
        }

        impl $name {
            pub(crate) fn from_fields(mut source: PageFields) -> Self {
                $( let $field = source.take(&[$($key),+]); )*
                $( let $list = source.take_list(&[$($lkey),+]); )*
                Self {
                    $($field,)*
                    $($list,)*
                    fields: source.values,
                    lists: source.lists,
                }
            }
        }
    };
}

profile_record! {
    /// Admissions figures.
    ApplyingRecord {
        values {
            acceptance_rate => ["acceptance_rate", "fall_acceptance_rate"],
            early_acceptance_rate => ["early_acceptance_rate", "early_decision_acceptance_rate"],
            application_deadline => ["application_deadline"],
            application_fee => ["application_fee"],
            sat_range => ["sat_range", "sat_25th_75th_percentile", "sat_act_range"],
            act_range => ["act_range", "act_25th_75th_percentile"],
            gpa_importance => ["gpa_importance", "high_school_gpa"],
            class_rank_importance => ["class_rank_importance", "high_school_class_rank"],
        }
        lists {}
    }
}

profile_record! {
    /// Cost and debt figures from the paying page.
    CostRecord {
        values {
            avg_cost_after_aid => ["cs_avg_cost_income", "average_cost_after_aid"],
            typical_debt => ["cs_typical_debt_income", "typical_total_debt_after_graduation"],
            loan_repayment_rate => ["cs_loan_repayment_income", "loan_repayment_rate"],
            net_price_federal_loan_recipients => ["net_price_federal_loan_recipients"],
            tuition_and_fees => ["tuition_and_fees", "in_state_tuition_and_fees"],
            room_and_board => ["room_and_board"],
        }
        lists {}
    }
}

profile_record! {
    /// Academic programs and outcomes.
    AcademicsRecord {
        values {
            study_abroad => ["aca_off_study_abroad", "study_abroad"],
            academic_calendar => ["academic_calendar"],
            average_class_size => ["average_class_size", "class_sizes"],
            graduation_rate => ["graduation_rate", "4_year_graduation_rate", "six_year_graduation_rate"],
            retention_rate => ["retention_rate", "freshman_retention_rate"],
            student_faculty_ratio => ["student_faculty_ratio"],
        }
        lists {
            popular_majors => ["most_popular_majors_list", "popular_majors_list"],
            majors => ["majors_list", "all_majors_list"],
            minors => ["minors_list"],
        }
    }
}

profile_record! {
    /// Enrollment, housing and athletics.
    StudentLifeRecord {
        values {
            total_all_students => ["total_all_students", "total_enrollment"],
            total_undergrads => ["total_undergrads", "undergraduate_enrollment"],
            total_grads_and_pros => ["total_grads_and_pros", "graduate_enrollment"],
            students_live_on_campus => ["students_live_on_campus", "students_in_college_housing"],
            athletic_division => ["athletic_division", "ncaa_division"],
            ncaa_sports => ["v_ncaa_sports", "ncaa_sports"],
        }
        lists {
            club_sports => ["club_sports_list"],
            intramural_sports => ["intramural_sports_list"],
        }
    }
}

profile_record! {
    /// Campus size, setting and policies.
    CampusInfoRecord {
        values {
            campus_size_acres => ["env_cam_size", "campus_size"],
            campus_setting => ["campus_setting", "setting"],
            alcohol_permitted => ["reg_alc_perm_yesno", "alcohol_permitted"],
            firearm_campus_carry_policy => ["CAMPUS_CARRY_POLICY", "campus_carry_policy"],
        }
        lists {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn fields(html: &str) -> PageFields {
        PageFields::extract(&Html::parse_document(html))
    }

    #[test]
    fn test_campus_info_maps_test_ids() {
        let record = CampusInfoRecord::from_fields(fields(
            r#"<div>
                <span data-test-id="env_cam_size">5,076 acres</span>
                <span data-test-id="reg_alc_perm_yesno">Yes</span>
                <span data-test-id="CAMPUS_CARRY_POLICY">Prohibited</span>
                <span data-test-id="unrelated_key">kept</span>
            </div>"#,
        ));
        assert_eq!(record.campus_size_acres.as_deref(), Some("5,076 acres"));
        assert_eq!(record.alcohol_permitted.as_deref(), Some("Yes"));
        assert_eq!(record.firearm_campus_carry_policy.as_deref(), Some("Prohibited"));
        assert_eq!(record.fields.get("unrelated_key").map(String::as_str), Some("kept"));
        assert!(!record.fields.contains_key("env_cam_size"));
    }

    #[test]
    fn test_academics_lists() {
        let record = AcademicsRecord::from_fields(fields(
            r#"<div class="DataRow__Row"><p>Student-faculty ratio</p><p>7:1</p></div>
               <section><h2>Majors</h2>
                 <div class="TruncatedList__List"><ul><li>History</li><li>Physics</li></ul></div>
               </section>"#,
        ));
        assert_eq!(record.student_faculty_ratio.as_deref(), Some("7:1"));
        assert_eq!(record.majors, vec!["History", "Physics"]);
        assert!(record.minors.is_empty());
        assert!(record.lists.is_empty());
    }

    #[test]
    fn test_alias_order_prefers_first_key() {
        let record = StudentLifeRecord::from_fields(fields(
            r#"<span data-test-id="total_enrollment">1</span>
               <span data-test-id="total_all_students">2</span>"#,
        ));
        assert_eq!(record.total_all_students.as_deref(), Some("2"));
        assert_eq!(record.fields.get("total_enrollment").map(String::as_str), Some("1"));
    }
}
