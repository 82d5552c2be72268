//! SQL text for each metric group.
//!
//! Every statement is read-only. Column order matches the shape declared for
//! the group in [`super::CATALOG`].

pub const ACTIVE_USERS: &str = "SELECT COUNT(*) FROM mdl_user \
    WHERE deleted = 0 AND lastaccess > UNIX_TIMESTAMP(NOW() - INTERVAL 5 MINUTE)";

pub const ONLINE_USERS: &str = "SELECT COUNT(*) FROM mdl_user \
    WHERE lastaccess > UNIX_TIMESTAMP(NOW() - INTERVAL 5 MINUTE)";

pub const ALL_USERS: &str = "SELECT COUNT(*) FROM mdl_user WHERE deleted = 0";

/// Bound parameter: the configured database name.
pub const DB_SIZE: &str = "SELECT SUM(data_length + index_length) / 1024 / 1024 \
    FROM information_schema.tables WHERE table_schema = ?";

pub const AVG_TIME_ON_SITE: &str = "SELECT AVG(lastaccess - firstaccess) FROM mdl_user \
    WHERE lastaccess != 0 AND firstaccess != 0";

pub const FAILED_LOGINS: &str =
    "SELECT COUNT(*) FROM mdl_logstore_standard_log WHERE action = 'login_failed'";

pub const ASSIGNMENTS_SUBMITTED: &str =
    "SELECT COUNT(*) FROM mdl_assign_submission WHERE status = 'submitted'";

pub const ENROLLED_PER_COURSE: &str = r#"
    SELECT c.id AS courseid, c.fullname AS coursename, COUNT(ue.userid) AS enrolled_users
    FROM mdl_user_enrolments ue
    JOIN mdl_enrol e ON ue.enrolid = e.id
    JOIN mdl_course c ON e.courseid = c.id
    GROUP BY c.id, c.fullname
"#;

pub const COURSE_COMPLETION_RATES: &str = r#"
    SELECT c.id, c.fullname, COUNT(cc.course) AS total_enrolled,
           SUM(CASE WHEN cc.timecompleted IS NOT NULL THEN 1 ELSE 0 END) AS total_completed
    FROM mdl_course c
    LEFT JOIN mdl_course_completions cc ON c.id = cc.course
    GROUP BY c.id, c.fullname
"#;

pub const QUIZ_ATTEMPTS_AND_SUCCESS: &str = r#"
    SELECT q.id, COUNT(qa.id) AS total_attempts,
           SUM(CASE WHEN qa.sumgrades >= q.grade THEN 1 ELSE 0 END) AS total_success
    FROM mdl_quiz q
    LEFT JOIN mdl_quiz_attempts qa ON q.id = qa.quiz
    WHERE qa.state = 'finished'
    GROUP BY q.id
"#;

pub const CERTIFICATION_ACHIEVEMENTS: &str = r#"
    SELECT cert.id, cert.name, COUNT(certissue.id) AS total_issued
    FROM mdl_customcert cert
    LEFT JOIN mdl_customcert_issues certissue ON cert.id = certissue.customcertid
    GROUP BY cert.id, cert.name
"#;

pub const GRADES_DISTRIBUTION: &str = r#"
    SELECT c.id, c.fullname, AVG(gg.finalgrade) AS average_grade
    FROM mdl_course c
    JOIN mdl_grade_items gi ON c.id = gi.courseid AND gi.itemtype = 'course'
    JOIN mdl_grade_grades gg ON gi.id = gg.itemid
    WHERE gg.finalgrade IS NOT NULL
    GROUP BY c.id, c.fullname
"#;

pub const ISSUED_BADGES: &str = r#"
    SELECT b.name, COUNT(bi.id)
    FROM mdl_badge_issued bi
    INNER JOIN mdl_badge b ON bi.badgeid = b.id
    GROUP BY b.name
"#;
